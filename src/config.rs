//! CLI configuration and argument parsing.

use std::collections::BTreeMap;

use clap::{Parser, Subcommand, ValueEnum};

use crate::orchestrator::UpgradeConfig;
use crate::site::LogConfig;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// In-place upgrade of a Skupper site to the version of this client.
///
/// Without a subcommand the site in the current namespace is upgraded.
#[derive(Parser, Debug, Clone)]
#[command(name = "skup")]
#[command(about = "In-place site upgrade orchestrator for Skupper sites")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Namespace of the site (defaults to the kubeconfig namespace)
    #[arg(short, long, global = true, env = "SKUPPER_NAMESPACE")]
    pub namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "SKUP_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upgrade the site to the version of this client
    Update(UpdateArgs),

    /// Restart the transport
    Restart,

    /// Set the transport debug mode; omit the value to turn it off
    DebugMode {
        /// Debug mode, e.g. gdb or asan
        mode: Option<String>,
    },

    /// Replace the pod annotations of the site workloads
    Annotations {
        #[arg(value_name = "KEY=VALUE", value_parser = parse_key_value)]
        annotations: Vec<(String, String)>,
    },

    /// Set router log levels
    Logging {
        /// MODULE:LEVEL, or LEVEL for the default module
        #[arg(value_name = "MODULE:LEVEL", required = true, value_parser = LogConfig::parse)]
        levels: Vec<LogConfig>,

        /// Restart the transport after changing the configuration
        #[arg(long, default_value = "false")]
        restart: bool,
    },
}

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateArgs {
    /// Restart workloads even if nothing changed
    #[arg(long, default_value = "false")]
    pub force_restart: bool,

    /// Transport image (defaults to the release image of this version)
    #[arg(long, env = "QDROUTERD_IMAGE")]
    pub router_image: Option<String>,

    /// Service controller image (defaults to the release image of this version)
    #[arg(long, env = "SKUPPER_SERVICE_CONTROLLER_IMAGE")]
    pub controller_image: Option<String>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Operation selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Update(UpdateArgs),
    Restart,
    DebugMode(Option<String>),
    Annotations(BTreeMap<String, String>),
    Logging { levels: Vec<LogConfig>, restart: bool },
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub operation: Operation,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        let operation = match args.command {
            None => Operation::Update(UpdateArgs::default()),
            Some(Command::Update(update)) => Operation::Update(update),
            Some(Command::Restart) => Operation::Restart,
            Some(Command::DebugMode { mode }) => Operation::DebugMode(mode),
            Some(Command::Annotations { annotations }) => {
                Operation::Annotations(annotations.into_iter().collect())
            }
            Some(Command::Logging { levels, restart }) => Operation::Logging { levels, restart },
        };

        Self {
            namespace: args.namespace,
            log_level: args.log_level,
            log_format: args.log_format,
            operation,
        }
    }
}

impl UpdateArgs {
    /// Upgrade inputs for `namespace`, filling in default images.
    pub fn upgrade_config(&self, namespace: &str) -> UpgradeConfig {
        let mut config = UpgradeConfig::new(namespace, VERSION);
        if let Some(image) = &self.router_image {
            config.router_image.clone_from(image);
        }
        if let Some(image) = &self.controller_image {
            config.controller_image.clone_from(image);
        }
        config.force_restart = self.force_restart;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Config {
        Config::from_args(Args::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_default_operation_is_update() {
        let config = Config::from_args(Args {
            namespace: None,
            log_level: "warn".to_string(),
            log_format: LogFormat::Text,
            command: None,
        });
        assert_eq!(config.operation, Operation::Update(UpdateArgs::default()));
    }

    #[test]
    fn test_update_flags() {
        let config = parse(&[
            "skup",
            "-n",
            "west",
            "update",
            "--force-restart",
            "--router-image",
            "example.com/router:dev",
        ]);
        assert_eq!(config.namespace.as_deref(), Some("west"));
        let Operation::Update(update) = config.operation else {
            panic!("expected update");
        };
        assert!(update.force_restart);

        let upgrade = update.upgrade_config("west");
        assert_eq!(upgrade.router_image, "example.com/router:dev");
        assert_eq!(
            upgrade.controller_image,
            format!("quay.io/skupper/service-controller:{VERSION}")
        );
        assert_eq!(upgrade.library_version, VERSION);
        assert!(upgrade.force_restart);
    }

    #[test]
    fn test_annotations_parsing() {
        let config = parse(&["skup", "annotations", "team=net", "empty="]);
        let Operation::Annotations(map) = config.operation else {
            panic!("expected annotations");
        };
        assert_eq!(map.len(), 2);
        assert_eq!(map["team"], "net");
        assert_eq!(map["empty"], "");
    }

    #[test]
    fn test_annotations_rejects_missing_separator() {
        assert!(Args::try_parse_from(["skup", "annotations", "team"]).is_err());
        assert!(Args::try_parse_from(["skup", "annotations", "=net"]).is_err());
    }

    #[test]
    fn test_logging_parsing() {
        let config = parse(&["skup", "logging", "ROUTER_CORE:debug+", "info", "--restart"]);
        let Operation::Logging { levels, restart } = config.operation else {
            panic!("expected logging");
        };
        assert!(restart);
        assert_eq!(levels[0].to_string(), "ROUTER_CORE:debug+");
        assert_eq!(levels[1].module, "DEFAULT");
    }

    #[test]
    fn test_logging_rejects_unknown_level() {
        assert!(Args::try_parse_from(["skup", "logging", "verbose"]).is_err());
    }

    #[test]
    fn test_debug_mode_without_value() {
        let config = parse(&["skup", "debug-mode"]);
        assert_eq!(config.operation, Operation::DebugMode(None));
    }

    #[test]
    fn test_log_format_flag() {
        let config = parse(&["skup", "restart", "--log-format", "json"]);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.operation, Operation::Restart);
    }
}
