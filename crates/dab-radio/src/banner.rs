use crate::build_info;

pub fn log_startup_banner() {
    let version = build_info::version();
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let build = option_env!("DAB_RADIO_BUILD")
        .map(str::to_string)
        .unwrap_or_else(build_info::summary);

    tracing::info!(
        target: "dab_radio_banner",
        version,
        os,
        arch,
        timestamp = %timestamp,
        build = %build,
        "startup"
    );
}
