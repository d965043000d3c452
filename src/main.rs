//! CLI entry point for `falcon`: call any CrowdStrike Falcon API operation
//! by its operation ID.
//!
//! Authenticates via OAuth2 client credentials (flags or `FALCON_CLIENT_ID`
//! / `FALCON_CLIENT_SECRET`), then dispatches the subcommand:
//!
//! - `call <operation>` runs one operation (or every page with `--all`),
//! - `find <term>` searches the operation catalog offline,
//! - `token` requests a token and prints the token endpoint's response,
//! - `revoke <token>` revokes a token.
//!
//! Results are printed as pretty JSON on stdout. Logs go to stderr and are
//! controlled by `RUST_LOG` (or `--debug`).
//!
//! Exit codes:
//! - 0: success (status < 400)
//! - 1: runtime error or API status >= 400
//! - 2: argument validation error (clap handles this automatically)

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use falcon_sdk::auth::TokenProvider;
use falcon_sdk::catalog::{Catalog, SearchBy};
use falcon_sdk::client::FalconClient;
use falcon_sdk::config::ClientConfig;
use falcon_sdk::error::{FalconError, Result};
use falcon_sdk::pagination::paginate;
use falcon_sdk::region::resolve_base_url;
use falcon_sdk::request::Request;
use falcon_sdk::response::ApiResponse;

#[derive(Parser)]
#[command(name = "falcon", version, about, long_about = None)]
struct Cli {
    /// Falcon API client ID.
    #[arg(long, env = "FALCON_CLIENT_ID")]
    client_id: Option<String>,

    /// Falcon API client secret. Prefer setting via the FALCON_CLIENT_SECRET
    /// environment variable to avoid exposing the secret in process listings
    /// and shell history.
    #[arg(long, env = "FALCON_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Child CID to act on (MSSP parents only).
    #[arg(long)]
    member_cid: Option<String>,

    /// Cloud region (`us-1`, `us-2`, `eu-1`, `usgov1`, `usgov2`) or base URL.
    /// Overrides the config file.
    #[arg(long)]
    base_url: Option<String>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log requests and responses (secrets redacted) to stderr.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call an operation by its operation ID.
    Call {
        /// Operation ID (e.g. `QueryDevicesByFilter`).
        operation: String,

        /// Keyword argument `name=value`. Repeatable.
        #[arg(long = "arg", value_parser = parse_key_value)]
        args: Vec<(String, String)>,

        /// Comma-delimited record ids.
        #[arg(long)]
        ids: Option<String>,

        /// JSON body.
        #[arg(long)]
        body: Option<String>,

        /// Route placeholder `name=value`. Repeatable.
        #[arg(long = "path", value_parser = parse_key_value)]
        path: Vec<(String, String)>,

        /// Follow pagination and print every `resources` entry.
        #[arg(long)]
        all: bool,

        /// Stop after this many pages (with `--all`). Must be at least 1.
        #[arg(long, requires = "all")]
        max_pages: Option<NonZeroUsize>,
    },

    /// Search the operation catalog.
    Find {
        /// Search term.
        term: String,

        /// Field to search.
        #[arg(long, value_enum, default_value_t = By::Id)]
        by: By,

        /// Require an exact match instead of a substring.
        #[arg(long)]
        exact: bool,
    },

    /// Request a token and print the token endpoint's response.
    Token,

    /// Revoke a token.
    Revoke {
        /// Token to revoke.
        token: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum By {
    Id,
    Collection,
    Route,
}

impl From<By> for SearchBy {
    fn from(by: By) -> Self {
        match by {
            By::Id => SearchBy::Id,
            By::Collection => SearchBy::Collection,
            By::Route => SearchBy::Route,
        }
    }
}

/// Parses `name=value`. Only the first `=` splits, so values may contain `=`.
fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "falcon_sdk=debug,falcon=debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(cli: &Cli) -> Result<FalconClient> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = resolve_base_url(base_url)?;
    }

    let mut provider = match (&cli.client_id, &cli.client_secret) {
        (Some(id), Some(secret)) => TokenProvider::new(id, secret),
        _ => TokenProvider::from_env(None),
    };
    if let Some(member_cid) = &cli.member_cid {
        provider = provider.with_member_cid(member_cid);
    }
    FalconClient::new(provider, config)
}

fn build_request(
    operation: &str,
    args: &[(String, String)],
    ids: Option<&str>,
    body: Option<&str>,
    path: &[(String, String)],
) -> Result<Request> {
    let mut request = Request::new(operation);
    for (name, value) in args {
        request = request.arg(name, value.as_str());
    }
    if let Some(ids) = ids {
        request = request.ids(ids.split(',').map(str::trim).filter(|s| !s.is_empty()));
    }
    if let Some(body) = body {
        let parsed: Value = serde_json::from_str(body)
            .map_err(|e| FalconError::InvalidArgument(format!("--body is not valid JSON: {e}")))?;
        request = request.body(parsed);
    }
    for (name, value) in path {
        request = request.path_arg(name, value);
    }
    Ok(request)
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}

/// Prints an envelope and maps its status onto the exit code.
fn report(envelope: &ApiResponse) -> ExitCode {
    print_json(&envelope.to_value());
    if envelope.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn find(term: &str, by: By, exact: bool) -> Result<ExitCode> {
    let catalog = Catalog::builtin()?;
    let found = catalog.find(term, by.into(), exact)?;
    let listed: Vec<Value> = found
        .iter()
        .map(|op| {
            json!({
                "id": op.id,
                "method": op.method,
                "route": op.route,
                "collection": op.collection,
                "description": op.description,
            })
        })
        .collect();
    print_json(&Value::from(listed));
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::Find { term, by, exact } = &cli.command {
        return find(term, *by, *exact);
    }

    let client = build_client(&cli)?;
    match &cli.command {
        Commands::Call {
            operation,
            args,
            ids,
            body,
            path,
            all,
            max_pages,
        } => {
            let request = build_request(operation, args, ids.as_deref(), body.as_deref(), path)?;
            if *all {
                let max_pages = max_pages.map(NonZeroUsize::get);
                let resources = paginate(&client, &request, max_pages).await?;
                print_json(&Value::from(resources));
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(report(&client.command(&request).await))
            }
        }
        Commands::Token => Ok(report(&client.login().await?)),
        Commands::Revoke { token } => Ok(report(&client.revoke(token).await?)),
        Commands::Find { .. } => Ok(ExitCode::SUCCESS),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            // Same envelope shape as API errors.
            print_json(&ApiResponse::from_error(&e).to_value());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Base arguments that satisfy the credential flags.
    /// Tests append a subcommand to this baseline.
    fn base_args() -> Vec<&'static str> {
        vec!["falcon", "--client-id", "cid-789", "--client-secret", "s3cret"]
    }

    #[test]
    fn missing_subcommand_is_rejected() {
        let result = Cli::try_parse_from(base_args());
        assert!(
            result.is_err(),
            "parsing should fail when no subcommand is provided"
        );
    }

    #[test]
    fn call_parses_repeated_args_and_paths() {
        let mut args = base_args();
        args.extend_from_slice(&[
            "call",
            "refreshActiveStreamSession",
            "--arg",
            "action_name=refresh_active_stream_session",
            "--arg",
            "appId=my-app",
            "--path",
            "partition=0",
        ]);
        let cli = Cli::try_parse_from(args).expect("should parse a complete call");
        assert_eq!(cli.client_id.as_deref(), Some("cid-789"));
        match cli.command {
            Commands::Call {
                operation,
                args,
                path,
                all,
                ..
            } => {
                assert_eq!(operation, "refreshActiveStreamSession");
                assert_eq!(args.len(), 2);
                assert_eq!(args[1], ("appId".to_string(), "my-app".to_string()));
                assert_eq!(path, vec![("partition".to_string(), "0".to_string())]);
                assert!(!all);
            }
            _ => panic!("expected call subcommand"),
        }
    }

    #[test]
    fn arg_values_may_contain_equals_signs() {
        assert_eq!(
            parse_key_value("filter=hostname:'a=b'").unwrap(),
            ("filter".to_string(), "hostname:'a=b'".to_string())
        );
        assert!(parse_key_value("no-separator").is_err());
        assert!(parse_key_value("=value").is_err());
    }

    #[test]
    fn max_pages_requires_all() {
        let mut args = base_args();
        args.extend_from_slice(&["call", "QueryDevicesByFilter", "--max-pages", "2"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn max_pages_must_be_positive() {
        let mut zero = base_args();
        zero.extend_from_slice(&["call", "QueryDevicesByFilter", "--all", "--max-pages", "0"]);
        assert!(Cli::try_parse_from(zero).is_err());

        let mut two = base_args();
        two.extend_from_slice(&["call", "QueryDevicesByFilter", "--all", "--max-pages", "2"]);
        match Cli::try_parse_from(two).unwrap().command {
            Commands::Call { max_pages, .. } => {
                assert_eq!(max_pages.map(NonZeroUsize::get), Some(2));
            }
            _ => panic!("expected call subcommand"),
        }
    }

    #[test]
    fn find_defaults_to_id_search() {
        let cli = Cli::try_parse_from(["falcon", "find", "Devices"]).expect("find needs no creds");
        match cli.command {
            Commands::Find { term, by, exact } => {
                assert_eq!(term, "Devices");
                assert!(matches!(by, By::Id));
                assert!(!exact);
            }
            _ => panic!("expected find subcommand"),
        }
    }

    #[test]
    fn find_accepts_collection_search() {
        let cli = Cli::try_parse_from(["falcon", "find", "hosts", "--by", "collection", "--exact"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Find {
                by: By::Collection,
                exact: true,
                ..
            }
        ));
    }

    #[test]
    fn build_request_splits_ids_and_parses_body() {
        let request = build_request(
            "PerformActionV2",
            &[("action_name".to_string(), "contain".to_string())],
            Some("aid1, aid2"),
            Some(r#"{"action_parameters": []}"#),
            &[],
        )
        .unwrap();
        let prepared = request.prepare(Catalog::builtin().unwrap()).unwrap();
        assert_eq!(
            prepared.body,
            Some(json!({"action_parameters": [], "ids": ["aid1", "aid2"]}))
        );
    }

    #[test]
    fn build_request_rejects_malformed_body() {
        let err = build_request("PerformActionV2", &[], None, Some("{oops"), &[]).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
