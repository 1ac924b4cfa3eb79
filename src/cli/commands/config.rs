//! Configuration CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use std::fmt::Write as _;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, LlmSettings};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration after all layers are merged
    Show,
}

/// Whether a configured backend can be used as-is.
#[derive(Debug, serde::Serialize)]
pub struct BackendReadiness {
    pub role: &'static str,
    pub provider: String,
    pub ready: bool,
    pub problem: Option<String>,
}

impl BackendReadiness {
    fn check(role: &'static str, settings: &LlmSettings) -> Self {
        let problem = settings.resolve().err().map(|e| e.to_string());
        Self {
            role,
            provider: settings.provider.clone(),
            ready: problem.is_none(),
            problem,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigOutput {
    pub config: Config,
    pub backends: Vec<BackendReadiness>,
}

impl ConfigOutput {
    pub fn new(config: Config) -> Self {
        let backends = vec![
            BackendReadiness::check("supervisor", &config.supervisor_llm),
            BackendReadiness::check("worker", &config.worker_llm),
        ];
        Self { config, backends }
    }
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        let mut text = serde_yaml::to_string(&self.config)
            .unwrap_or_else(|e| format!("Failed to render configuration: {e}\n"));
        text.push('\n');
        for backend in &self.backends {
            let state = backend.problem.as_deref().unwrap_or("ready");
            let _ = writeln!(text, "{} backend ({}): {state}", backend.role, backend.provider);
        }
        text.trim_end().to_string()
    }
}

pub fn execute(args: ConfigArgs, config: Config, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommands::Show => output(&ConfigOutput::new(config), json_mode),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_readiness() {
        temp_env::with_var_unset("ANTHROPIC_API_KEY", || {
            let mut config = Config::default();
            config.supervisor_llm = LlmSettings::new("mock", "");
            config.worker_llm = LlmSettings::new("anthropic", "claude-test");

            let out = ConfigOutput::new(config);
            assert!(out.backends[0].ready);
            assert!(!out.backends[1].ready);
            let human = out.to_human();
            assert!(human.contains("supervisor backend (mock): ready"));
            assert!(human.contains("ANTHROPIC_API_KEY"));
        });
    }

    #[test]
    fn test_api_key_is_never_printed() {
        let mut config = Config::default();
        config.worker_llm.api_key = Some("sk-secret".to_string());
        let out = ConfigOutput::new(config);
        assert!(!out.to_human().contains("sk-secret"));
        assert!(!out.to_json().to_string().contains("sk-secret"));
    }
}
