//! Print the release name of a service

use anyhow::Result;

use helm_rollout::domain::release_name;

pub fn execute(project: &str, stage: &str, service: &str, generated: bool) -> Result<()> {
    println!("{}", release_name(project, stage, service, generated));
    Ok(())
}
