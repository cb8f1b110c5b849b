use serde::Serialize;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn build_source() -> &'static str {
    option_env!("DAB_RADIO_BUILD_SOURCE").unwrap_or("unknown")
}

pub fn release_tag() -> Option<&'static str> {
    option_env!("DAB_RADIO_RELEASE_TAG")
}

pub fn profile() -> &'static str {
    option_env!("DAB_RADIO_PROFILE").unwrap_or("release")
}

pub fn target() -> &'static str {
    option_env!("DAB_RADIO_TARGET").unwrap_or("")
}

pub fn git_commit() -> Option<&'static str> {
    option_env!("DAB_RADIO_GIT_COMMIT")
}

pub fn git_tag() -> Option<&'static str> {
    option_env!("DAB_RADIO_GIT_TAG")
}

pub fn git_dirty() -> Option<bool> {
    option_env!("DAB_RADIO_GIT_DIRTY").and_then(|s| match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    })
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub source: &'static str,
    pub release_tag: Option<&'static str>,
    pub profile: &'static str,
    pub target: &'static str,
    pub git_commit: Option<&'static str>,
    pub git_tag: Option<&'static str>,
    pub git_dirty: Option<bool>,
}

pub fn collect() -> BuildInfo {
    BuildInfo {
        version: version(),
        source: build_source(),
        release_tag: release_tag(),
        profile: profile(),
        target: target(),
        git_commit: git_commit(),
        git_tag: git_tag(),
        git_dirty: git_dirty(),
    }
}

/// Short form for the startup banner, e.g. `git 1a2b3c4d5e6f-dirty debug`.
pub fn summary() -> String {
    let mut parts = vec![build_source().to_string()];
    if let Some(tag) = release_tag().or(git_tag()) {
        parts.push(tag.to_string());
    } else if let Some(commit) = git_commit() {
        let dirty = if git_dirty() == Some(true) { "-dirty" } else { "" };
        parts.push(format!("{commit}{dirty}"));
    }
    if profile() != "release" {
        parts.push(profile().to_string());
    }
    parts.join(" ")
}
