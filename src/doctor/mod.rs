use crate::config::Config;
use crate::daemon::Components;
use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl Check {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: false,
            detail: detail.into(),
        }
    }
}

pub async fn run(config: &Config) -> Result<()> {
    let components = Components::from_config(config)?;
    let checks = diagnose(config, &components).await;

    println!("🩺 llamarelay Doctor");
    println!("  Config: {}", config.config_path.display());
    for check in &checks {
        let icon = if check.ok { "✅" } else { "❌" };
        println!("  {icon} {}: {}", check.name, check.detail);
    }

    let failed = checks.iter().filter(|c| !c.ok).count();
    if failed == 0 {
        println!("  All checks passed");
    } else {
        println!("  {failed} check(s) failed");
    }
    Ok(())
}

pub async fn diagnose(config: &Config, components: &Components) -> Vec<Check> {
    let mut checks = Vec::new();

    if config.telegram.bot_token.trim().is_empty() {
        checks.push(Check::fail("telegram", "bot token not configured"));
    } else if components.messenger.health_check().await {
        checks.push(Check::pass("telegram", "getMe succeeded"));
    } else {
        checks.push(Check::fail("telegram", "getMe failed; check the bot token"));
    }

    if config.telegram.allowed_users.is_empty() {
        checks.push(Check::fail(
            "allowlist",
            "telegram.allowed_users is empty; every sender will be ignored",
        ));
    } else {
        checks.push(Check::pass(
            "allowlist",
            format!("{} entr(y/ies)", config.telegram.allowed_users.len()),
        ));
    }

    match components.provider.list_models().await {
        Ok(models) if models.iter().any(|m| m == &config.ollama.default_model) => {
            checks.push(Check::pass(
                "ollama",
                format!(
                    "{} model(s), default '{}' present",
                    models.len(),
                    config.ollama.default_model
                ),
            ));
        }
        Ok(models) => checks.push(Check::fail(
            "ollama",
            format!(
                "default model '{}' not among {} installed model(s)",
                config.ollama.default_model,
                models.len()
            ),
        )),
        Err(e) => checks.push(Check::fail(
            "ollama",
            format!("{} unreachable: {e}", config.ollama.base_url),
        )),
    }

    let backend = components.store.name();
    if components.store.health_check().await {
        checks.push(Check::pass("transcripts", format!("{backend} backend ok")));
    } else {
        checks.push(Check::fail("transcripts", format!("{backend} backend unhealthy")));
    }

    checks.push(Check::pass(
        "modes",
        format!(
            "{} mode(s), default '{}'",
            components.modes.len(),
            components.modes.default_key()
        ),
    ));

    checks
}
