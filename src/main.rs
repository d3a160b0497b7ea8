//! deferlink command line
//!
//! Drives the attribution client against a tracking backend: inspect the
//! fingerprint of this host, resolve deferred params, record clicks, decode
//! deep links and build wake-up links.
//!
//! Usage:
//!   deferlink fetch --store params.json
//!   deferlink save --url "https://example.com/download?inviteCode=ABC123"
//!   deferlink link "app://open?inviteCode=XYZ&channelId=9"
//!
//! Environment:
//!   DEFERLINK_CONFIG_PATH - TOML config file (default: deferlink.toml)
//!   DEFERLINK_BASE_URL    - Tracking API base URL
//!   DEFERLINK_TIMEOUT_MS  - Request timeout in milliseconds
//!   RUST_LOG              - Log filter (default: deferlink=info)
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deferlink::deeplink::{landing_params, LinkBuilder, UNIVERSAL_LINK_DELAY};
use deferlink::fingerprint::{canonicalize, fingerprint_id};
use deferlink::store::{JsonFileParamStore, PersistingListener};
use deferlink::{
    AttributionConfig, AttributionContext, HostCollector, InstallParams, Notifier, Platform,
    ReconciledParams, SignalCollector, StaticCollector,
};

#[derive(Parser, Debug)]
#[command(name = "deferlink")]
#[command(about = "Deferred deep-link attribution client", version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "DEFERLINK_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Tracking API base URL (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Request timeout in milliseconds (overrides the config file)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the fingerprint and its identifier
    Fingerprint {
        #[command(flatten)]
        device: DeviceArgs,

        /// Also print the canonical serialization
        #[arg(long)]
        canonical: bool,
    },

    /// Resolve deferred install params
    Fetch {
        #[command(flatten)]
        device: DeviceArgs,

        /// Persist recognized params to this JSON file
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Record a click for this device
    Save {
        #[command(flatten)]
        device: DeviceArgs,

        /// Param as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        #[arg(long)]
        referrer: Option<String>,

        /// Landing page URL; its recognized params are used when no --param is given
        #[arg(long)]
        url: Option<String>,
    },

    /// Decode and deliver a live deep link
    Link {
        url: String,

        /// Persist recognized params to this JSON file
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Build the links a landing page opens to wake the app
    Wakeup {
        /// App scheme, e.g. myapp://
        #[arg(long)]
        scheme: Option<String>,

        /// Universal link base, e.g. https://link.example.com
        #[arg(long)]
        universal: Option<String>,

        /// Param as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Check the tracking backend
    Health,
}

/// Fingerprint source: this host, or a described device.
#[derive(Args, Debug)]
struct DeviceArgs {
    /// Describe a device instead of collecting from this host
    #[arg(long)]
    platform: Option<Platform>,

    /// Device signal as key=value (string) or key:=json (typed, e.g.
    /// screenWidth:=1080). Repeatable, requires --platform
    #[arg(long = "signal", value_parser = parse_signal, requires = "platform")]
    signals: Vec<(String, serde_json::Value)>,
}

impl DeviceArgs {
    fn collector(&self) -> Arc<dyn SignalCollector> {
        match self.platform {
            Some(platform) => {
                let mut collector = StaticCollector::new(platform);
                for (key, value) in &self.signals {
                    collector.set_signal(key.clone(), value.clone());
                }
                Arc::new(collector)
            }
            None => Arc::new(HostCollector::new()),
        }
    }
}

/// `key=value` is a string signal, as the mobile bindings record them.
/// `key:=json` keeps the JSON type (numbers, booleans, null).
fn parse_signal(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = parse_key_val(raw)?;
    match key.strip_suffix(':') {
        Some(typed) if !typed.is_empty() => serde_json::from_str(&value)
            .map(|json| (typed.to_string(), json))
            .map_err(|e| format!("invalid JSON for signal '{}': {}", typed, e)),
        Some(_) => Err(format!("expected key:=json, got '{}'", raw)),
        None => Ok((key, serde_json::Value::String(value))),
    }
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn load_config(cli: &Cli) -> Result<AttributionConfig> {
    let mut config = match &cli.config {
        Some(path) => AttributionConfig::load(path)?
            .with_overrides(|key| std::env::var(key).ok()),
        None => AttributionConfig::from_env(),
    };
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        config.request_timeout = Duration::from_millis(ms);
    }
    Ok(config)
}

fn notifier_with_store(store: Option<&PathBuf>) -> Result<Arc<Notifier>> {
    let notifier = Arc::new(Notifier::new());
    notifier.register(|event: &ReconciledParams| -> Result<()> {
        info!(kind = %event.kind, event_id = %event.event_id, "Params received");
        Ok(())
    });
    if let Some(path) = store {
        let store = JsonFileParamStore::open(path)
            .with_context(|| format!("Failed to open param store {}", path.display()))?;
        notifier.register(PersistingListener::new(Arc::new(store)));
    }
    Ok(notifier)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deferlink=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Fingerprint { device, canonical } => {
            let fingerprint = device.collector().collect();
            let mut out = json!({
                "fingerprintId": fingerprint_id(&fingerprint),
                "fingerprint": fingerprint,
                "gaps": fingerprint.gaps(),
            });
            if *canonical {
                out["canonical"] = json!(canonicalize(&fingerprint).as_str());
            }
            print_json(&out)?;
        }

        Command::Fetch { device, store } => {
            let context = AttributionContext::new(load_config(&cli)?)?;
            let notifier = notifier_with_store(store.as_ref())?;
            let reconciler = Arc::new(context.reconciler(device.collector(), notifier));

            let result = reconciler.start().await.context("Deferred resolve task failed")?;
            print_json(&json!({
                "matched": result.is_matched(),
                "params": result.params(),
                "state": format!("{:?}", reconciler.state()),
            }))?;
        }

        Command::Save {
            device,
            params,
            referrer,
            url,
        } => {
            let params: InstallParams = if params.is_empty() {
                match url {
                    Some(url) => landing_params(url),
                    None => bail!("Nothing to save: pass --param key=value or --url"),
                }
            } else {
                params.iter().cloned().collect()
            };

            let context = AttributionContext::new(load_config(&cli)?)?;
            let fingerprint = device.collector().collect();
            let saved = context
                .client()
                .save_click(&fingerprint, &params, referrer.as_deref(), url.as_deref())
                .await?;
            print_json(&json!({
                "saved": saved,
                "fingerprintId": fingerprint_id(&fingerprint),
                "params": params,
            }))?;
        }

        Command::Link { url, store } => {
            let context = AttributionContext::new(load_config(&cli)?)?;
            let notifier = notifier_with_store(store.as_ref())?;
            let reconciler = context.reconciler(Arc::new(HostCollector::new()), notifier);
            match reconciler.handle_deep_link(url) {
                Some(event) => print_json(&serde_json::to_value(&event)?)?,
                None => {
                    warn!(url = %url, "Deep link carries no params");
                    print_json(&json!(null))?;
                }
            }
        }

        Command::Wakeup {
            scheme,
            universal,
            params,
        } => {
            let mut builder = LinkBuilder::new();
            if let Some(scheme) = scheme {
                builder = builder.with_app_scheme(scheme.clone());
            }
            if let Some(universal) = universal {
                builder = builder.with_universal_link(universal.clone());
            }
            if scheme.is_none() && universal.is_none() {
                bail!("Pass --scheme and/or --universal");
            }

            let params: InstallParams = params.iter().cloned().collect();
            print_json(&json!({
                "urls": builder.wakeup_urls(&params),
                "universalLinkDelayMs": UNIVERSAL_LINK_DELAY.as_millis() as u64,
            }))?;
        }

        Command::Health => {
            let context = AttributionContext::new(load_config(&cli)?)?;
            let healthy = context.client().health().await?;
            print_json(&json!({
                "baseUrl": context.client().base_url(),
                "healthy": healthy,
            }))?;
            if !healthy {
                bail!("Tracking backend reported unhealthy");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("inviteCode=A=B").unwrap(),
            ("inviteCode".to_string(), "A=B".to_string())
        );
        assert!(parse_key_val("=x").is_err());
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn test_signals_are_strings_unless_typed() {
        assert_eq!(parse_signal("osVersion=13").unwrap(), ("osVersion".to_string(), json!("13")));
        assert_eq!(parse_signal("cookieEnabled=true").unwrap().1, json!("true"));
        assert_eq!(parse_signal("screenWidth:=1080").unwrap(), ("screenWidth".to_string(), json!(1080)));
        assert_eq!(parse_signal("cookieEnabled:=true").unwrap().1, json!(true));
        assert_eq!(parse_signal("timezone:=null").unwrap().1, json!(null));
        assert!(parse_signal("screenWidth:=wide").is_err());
        assert!(parse_signal(":=1").is_err());
    }

    #[test]
    fn test_cli_fingerprint_matches_sdk_fingerprint() {
        let cli = Cli::try_parse_from([
            "deferlink",
            "fingerprint",
            "--platform",
            "Android",
            "--signal",
            "osVersion=13",
            "--signal",
            "deviceModel=Pixel7",
            "--signal",
            "screenWidth:=1080",
        ])
        .unwrap();
        let device = match cli.command {
            Command::Fingerprint { device, .. } => device,
            other => panic!("unexpected command {:?}", other),
        };
        let from_cli = device.collector().collect();

        let from_sdk = StaticCollector::new(Platform::Android)
            .with_signal("osVersion", "13")
            .with_signal("deviceModel", "Pixel7")
            .with_signal("screenWidth", 1080)
            .collect();

        assert_eq!(from_cli.get("userAgent"), Some(&json!("Android/13 Pixel7")));
        assert_eq!(from_cli, from_sdk);
        assert_eq!(fingerprint_id(&from_cli), fingerprint_id(&from_sdk));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "deferlink",
            "--base-url",
            "http://127.0.0.1:8080/api",
            "save",
            "--platform",
            "Android",
            "--signal",
            "osVersion=13",
            "--param",
            "inviteCode=ABC123",
        ])
        .unwrap();
        assert_eq!(cli.base_url.as_deref(), Some("http://127.0.0.1:8080/api"));
        match cli.command {
            Command::Save { device, params, .. } => {
                assert_eq!(device.platform, Some(Platform::Android));
                assert_eq!(params, vec![("inviteCode".to_string(), "ABC123".to_string())]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
