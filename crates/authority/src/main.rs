use anyhow::Context;

use ppghub_authority::Authority;
use ppghub_infra::{AuthConfig, Pagination};

/// Load the configuration, bring the authority up on in-memory stores and
/// print the seeded role catalog.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AuthConfig::from_env().context("loading PPGHUB_* configuration")?;
    ppghub_observability::init_with(&config.log);

    let authority = Authority::in_memory(config)
        .await
        .context("starting the authority")?;

    let catalog = authority
        .roles()
        .list(Pagination::new(Some(Pagination::MAX_LIMIT), None))
        .await
        .context("listing the role catalog")?;
    for role in &catalog.items {
        tracing::info!(
            role = %role.name,
            access_level = %role.access_level,
            capabilities = ?role.capabilities.names(),
            "role available"
        );
    }

    println!("{}", serde_json::to_string_pretty(&catalog.items)?);
    Ok(())
}
