//! Chart, release, and namespace naming
//!
//! Helm release names end up in DNS labels, so they must stay below
//! [`MAX_RELEASE_NAME_LEN`] characters.

/// Release names must be strictly shorter than this
pub const MAX_RELEASE_NAME_LEN: usize = 53;

/// Suffix carried by every generated chart and release
pub const GENERATED_SUFFIX: &str = "-generated";

/// Longest DNS label Kubernetes accepts
pub const MAX_LABEL_LEN: usize = 63;

/// Whether `name` is a lowercase RFC 1123 label.
///
/// Project, stage, and service names become namespace and release names as
/// well as chart store path segments, so anything else is rejected up front.
pub fn is_dns_label(name: &str) -> bool {
    name.len() <= MAX_LABEL_LEN && is_label_shaped(name)
}

/// Lowercase alphanumerics and inner dashes, of any length
pub fn is_label_shaped(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Chart name for a service's user chart or generated chart
pub fn chart_name(service: &str, generated: bool) -> String {
    if generated {
        format!("{}{}", service, GENERATED_SUFFIX)
    } else {
        service.to_string()
    }
}

/// Namespace a stage of a project is deployed into
pub fn namespace(project: &str, stage: &str) -> String {
    format!("{}-{}", project, stage)
}

/// Helm release name for a service in a stage.
///
/// Tries `project-stage-service`, then `stage-service`, then `service`,
/// and finally truncates the service name so the suffix still fits.
pub fn release_name(project: &str, stage: &str, service: &str, generated: bool) -> String {
    let suffix = if generated { GENERATED_SUFFIX } else { "" };

    let candidates = [
        format!("{}-{}-{}{}", project, stage, service, suffix),
        format!("{}-{}{}", stage, service, suffix),
        format!("{}{}", service, suffix),
    ];

    if let Some(name) = candidates
        .into_iter()
        .find(|name| name.chars().count() < MAX_RELEASE_NAME_LEN)
    {
        return name;
    }

    let keep = MAX_RELEASE_NAME_LEN - 1 - suffix.len();
    let truncated: String = service.chars().take(keep).collect();
    format!("{}{}", truncated, suffix)
}
