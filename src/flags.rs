//! Optional CLI surface: the standard sink flag set, credential loading and
//! module-graph helpers shared by sink binaries.
//!
//! Embed [`SinkerFlags`] into a clap command with `#[command(flatten)]` and
//! feed it to a [`SinkerBuilder`] through [`SinkerFlags::apply`].

use std::time::Duration;

use clap::Args;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};

use crate::SinkError;
use crate::liveness::DeltaLivenessChecker;
use crate::pb::substreams::v1::{Module, Modules, module};
use crate::sinker::{DEFAULT_UNDO_BUFFER_SIZE, SinkerBuilder, SubstreamsMode};

/// The standard flag set understood by Substreams sinks.
#[derive(Debug, Clone, Args)]
pub struct SinkerFlags {
    /// Set a parameter for a parameterizable module (`module=value`), repeatable
    #[arg(long, value_name = "module=value")]
    pub params: Vec<String>,

    /// Network to use for network-parameterized packages
    #[arg(long)]
    pub network: Option<String>,

    /// Skip certificate validation on the gRPC connection
    #[arg(long, short = 'k')]
    pub insecure: bool,

    /// Establish the gRPC connection in plaintext
    #[arg(long, short = 'p')]
    pub plaintext: bool,

    /// Number of blocks to keep buffered to handle fork reorganizations
    #[arg(long, default_value_t = DEFAULT_UNDO_BUFFER_SIZE)]
    pub undo_buffer_size: usize,

    /// Consider the chain live if block time is within this duration of current time
    #[arg(long, default_value = "300s", value_parser = humantime::parse_duration)]
    pub live_block_time_delta: Duration,

    /// Enable development mode, for testing purposes only
    #[arg(long)]
    pub development_mode: bool,

    /// Get only final blocks
    #[arg(long)]
    pub final_blocks_only: bool,

    /// Deprecated, renamed to --final-blocks-only
    #[arg(long, hide = true)]
    pub irreversible_only: bool,

    /// Default behavior is to retry 15 times spanning approximately 5m before
    /// exiting with an error, activating this flag retries forever
    #[arg(long)]
    pub infinite_retry: bool,

    /// Do not validate the package and module graph before streaming
    #[arg(long)]
    pub skip_package_validation: bool,

    /// Additional gRPC header (`name: value`), repeatable
    #[arg(long = "header", short = 'H', value_name = "name: value")]
    pub headers: Vec<String>,
}

impl SinkerFlags {
    #[must_use]
    pub fn mode(&self) -> SubstreamsMode {
        if self.development_mode {
            SubstreamsMode::Development
        } else {
            SubstreamsMode::Production
        }
    }

    /// Final-blocks-only requested through either the current flag or its
    /// deprecated alias.
    #[must_use]
    pub fn resolved_final_blocks_only(&self) -> bool {
        self.final_blocks_only || self.irreversible_only
    }

    /// Parses the repeatable `--header` values into gRPC metadata.
    ///
    /// # Errors
    ///
    /// [`SinkError::Configuration`] on a header missing the `:` separator or
    /// carrying a non-ASCII name or value.
    pub fn extra_headers(&self) -> Result<MetadataMap, SinkError> {
        let mut headers = MetadataMap::new();

        for header in &self.headers {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                SinkError::Configuration(format!(
                    "invalid header {header:?}, expected `name: value`"
                ))
            })?;

            let key = name
                .trim()
                .to_ascii_lowercase()
                .parse::<AsciiMetadataKey>()
                .map_err(|_| {
                    SinkError::Configuration(format!("invalid header name {name:?}"))
                })?;
            let value = value.trim().parse::<AsciiMetadataValue>().map_err(|_| {
                SinkError::Configuration(format!("invalid header value for {name:?}"))
            })?;

            headers.append(key, value);
        }

        Ok(headers)
    }

    /// Applies every recognized flag to `builder`.
    ///
    /// # Errors
    ///
    /// [`SinkError::Configuration`] when header values cannot be parsed.
    pub fn apply(&self, mut builder: SinkerBuilder) -> Result<SinkerBuilder, SinkError> {
        if self.undo_buffer_size > 0 {
            builder = builder.undo_buffer_size(self.undo_buffer_size);
        }

        if self.infinite_retry {
            builder = builder.infinite_retry();
        }

        if self.resolved_final_blocks_only() {
            builder = builder.final_blocks_only();
        }

        if !self.live_block_time_delta.is_zero() {
            builder =
                builder.liveness_checker(DeltaLivenessChecker::new(self.live_block_time_delta));
        }

        let headers = self.extra_headers()?;
        if !headers.is_empty() {
            builder = builder.extra_headers(headers);
        }

        Ok(builder)
    }
}

/// Reads the Substreams API token from the environment:
/// `SUBSTREAMS_API_TOKEN` first, `SF_API_TOKEN` as fallback.
#[must_use]
pub fn read_api_token() -> Option<String> {
    read_api_token_from(|name| std::env::var(name).ok())
}

fn read_api_token_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup("SUBSTREAMS_API_TOKEN")
        .filter(|token| !token.is_empty())
        .or_else(|| lookup("SF_API_TOKEN").filter(|token| !token.is_empty()))
}

/// Splits an output type into its unprefixed and `proto:`-prefixed forms:
/// `com.acme` and `proto:com.acme` both yield `("com.acme", "proto:com.acme")`.
fn sanitize_module_type(input: &str) -> (String, String) {
    match input.strip_prefix("proto:") {
        Some(unprefixed) => (unprefixed.to_string(), input.to_string()),
        None => (input.to_string(), format!("proto:{input}")),
    }
}

/// Finds the output module `name` in `modules` and validates it is a mapper
/// with one of the expected output types.
///
/// `expected_types` is a comma-separated list of Protobuf type names, with
/// or without the `proto:` prefix; `None` disables the type check.
///
/// # Errors
///
/// [`SinkError::Configuration`] when the module is missing, is not a map
/// module, or its output type does not match.
pub fn resolve_output_module(
    modules: &Modules,
    name: &str,
    expected_types: Option<&str>,
) -> Result<Module, SinkError> {
    let module = modules
        .modules
        .iter()
        .find(|module| module.name == name)
        .ok_or_else(|| SinkError::Configuration(format!("output module {name:?} not found")))?;

    let Some(module::Kind::KindMap(_)) = &module.kind else {
        return Err(SinkError::Configuration(format!(
            "output module {name:?} is not of type 'Mapper'"
        )));
    };

    if let Some(expected_types) = expected_types {
        let actual_type = module
            .output
            .as_ref()
            .map(|output| output.r#type.as_str())
            .unwrap_or_default();
        let (actual_unprefixed, actual_prefixed) = sanitize_module_type(actual_type);

        let expected: Vec<(String, String)> = expected_types
            .split(',')
            .map(|expected| sanitize_module_type(expected.trim()))
            .collect();

        if !expected
            .iter()
            .any(|(_, prefixed)| *prefixed == actual_prefixed)
        {
            let accepted: Vec<&str> = expected
                .iter()
                .map(|(unprefixed, _)| unprefixed.as_str())
                .collect();
            return Err(SinkError::Configuration(format!(
                "sink only supports map module with output type {:?} but selected module {:?} output type is {:?}",
                accepted.join(", "),
                name,
                actual_unprefixed
            )));
        }
    }

    Ok(module.clone())
}

/// Applies `module=value` parameter overrides to the module graph, rewriting
/// each target module's params input.
///
/// # Errors
///
/// [`SinkError::Configuration`] on a malformed entry, an unknown module, or
/// a module without a params input.
pub fn apply_params(modules: &mut Modules, params: &[String]) -> Result<(), SinkError> {
    for param in params {
        let (name, value) = param.split_once('=').ok_or_else(|| {
            SinkError::Configuration(format!(
                "invalid param {param:?}, expected `module=value`"
            ))
        })?;

        let module = modules
            .modules
            .iter_mut()
            .find(|module| module.name == name)
            .ok_or_else(|| {
                SinkError::Configuration(format!("param for unknown module {name:?}"))
            })?;

        let params_input = module
            .inputs
            .iter_mut()
            .find_map(|input| match &mut input.input {
                Some(module::input::Input::Params(params)) => Some(params),
                _ => None,
            })
            .ok_or_else(|| {
                SinkError::Configuration(format!("module {name:?} has no params input"))
            })?;

        params_input.value = value.to_string();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        flags: SinkerFlags,
    }

    fn map_module(name: &str, output_type: &str) -> Module {
        Module {
            name: name.to_string(),
            kind: Some(module::Kind::KindMap(module::KindMap {
                output_type: output_type.to_string(),
            })),
            output: Some(module::Output {
                r#type: output_type.to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_the_documented_flag_set() {
        let cli = Cli::try_parse_from(["sink"]).unwrap();

        assert!(cli.flags.params.is_empty());
        assert_eq!(cli.flags.network, None);
        assert!(!cli.flags.insecure);
        assert!(!cli.flags.plaintext);
        assert_eq!(cli.flags.undo_buffer_size, 12);
        assert_eq!(cli.flags.live_block_time_delta, Duration::from_secs(300));
        assert!(!cli.flags.development_mode);
        assert!(!cli.flags.resolved_final_blocks_only());
        assert!(!cli.flags.infinite_retry);
        assert!(!cli.flags.skip_package_validation);
        assert!(cli.flags.headers.is_empty());
        assert_eq!(cli.flags.mode(), SubstreamsMode::Production);
    }

    #[test]
    fn short_flags_and_repeatables_parse() {
        let cli = Cli::try_parse_from([
            "sink",
            "-k",
            "-p",
            "--params",
            "map_events=addr=0xdead",
            "--params",
            "map_blocks=42",
            "-H",
            "x-trace: abc",
            "-H",
            "x-other: def",
            "--live-block-time-delta",
            "30s",
        ])
        .unwrap();

        assert!(cli.flags.insecure);
        assert!(cli.flags.plaintext);
        assert_eq!(cli.flags.params.len(), 2);
        assert_eq!(cli.flags.headers.len(), 2);
        assert_eq!(cli.flags.live_block_time_delta, Duration::from_secs(30));
    }

    #[test]
    fn deprecated_irreversible_only_maps_to_final_blocks_only() {
        let cli = Cli::try_parse_from(["sink", "--irreversible-only"]).unwrap();
        assert!(cli.flags.resolved_final_blocks_only());
    }

    #[test]
    fn headers_parse_into_metadata() {
        let cli = Cli::try_parse_from(["sink", "-H", "X-Api-Key: s3cret"]).unwrap();
        let headers = cli.flags.extra_headers().unwrap();

        assert_eq!(headers.get("x-api-key").unwrap(), "s3cret");
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let cli = Cli::try_parse_from(["sink", "-H", "no-separator"]).unwrap();
        assert!(matches!(
            cli.flags.extra_headers(),
            Err(SinkError::Configuration(_))
        ));
    }

    #[test]
    fn token_env_precedence() {
        let token = read_api_token_from(|name| match name {
            "SUBSTREAMS_API_TOKEN" => Some("primary".to_string()),
            "SF_API_TOKEN" => Some("fallback".to_string()),
            _ => None,
        });
        assert_eq!(token.as_deref(), Some("primary"));

        let token = read_api_token_from(|name| match name {
            "SF_API_TOKEN" => Some("fallback".to_string()),
            _ => None,
        });
        assert_eq!(token.as_deref(), Some("fallback"));

        let token = read_api_token_from(|name| match name {
            "SUBSTREAMS_API_TOKEN" => Some(String::new()),
            "SF_API_TOKEN" => Some("fallback".to_string()),
            _ => None,
        });
        assert_eq!(token.as_deref(), Some("fallback"));

        assert_eq!(read_api_token_from(|_| None), None);
    }

    #[test]
    fn sanitize_module_type_handles_both_directions() {
        assert_eq!(
            sanitize_module_type("com.acme"),
            ("com.acme".to_string(), "proto:com.acme".to_string())
        );
        assert_eq!(
            sanitize_module_type("proto:com.acme"),
            ("com.acme".to_string(), "proto:com.acme".to_string())
        );
    }

    #[test]
    fn resolve_output_module_validates_kind_and_type() {
        let modules = Modules {
            modules: vec![
                map_module("map_events", "proto:com.acme.Events"),
                Module {
                    name: "store_totals".to_string(),
                    kind: Some(module::Kind::KindStore(module::KindStore::default())),
                    ..Default::default()
                },
            ],
            binaries: vec![],
        };

        let resolved =
            resolve_output_module(&modules, "map_events", Some("com.acme.Events")).unwrap();
        assert_eq!(resolved.name, "map_events");

        // Comma-separated alternatives, prefixed or not.
        resolve_output_module(
            &modules,
            "map_events",
            Some("proto:com.acme.Other, com.acme.Events"),
        )
        .unwrap();

        assert!(matches!(
            resolve_output_module(&modules, "map_events", Some("com.acme.Other")),
            Err(SinkError::Configuration(_))
        ));
        assert!(matches!(
            resolve_output_module(&modules, "store_totals", None),
            Err(SinkError::Configuration(_))
        ));
        assert!(matches!(
            resolve_output_module(&modules, "missing", None),
            Err(SinkError::Configuration(_))
        ));
    }

    #[test]
    fn apply_params_rewrites_the_params_input() {
        let mut modules = Modules {
            modules: vec![Module {
                inputs: vec![module::Input {
                    input: Some(module::input::Input::Params(module::input::Params {
                        value: "default".to_string(),
                    })),
                }],
                ..map_module("map_events", "proto:com.acme.Events")
            }],
            binaries: vec![],
        };

        apply_params(&mut modules, &["map_events=addr=0xbeef".to_string()]).unwrap();

        let module::input::Input::Params(params) =
            modules.modules[0].inputs[0].input.as_ref().unwrap()
        else {
            panic!("expected params input");
        };
        assert_eq!(params.value, "addr=0xbeef");

        assert!(matches!(
            apply_params(&mut modules, &["unknown=1".to_string()]),
            Err(SinkError::Configuration(_))
        ));
        assert!(matches!(
            apply_params(&mut modules, &["malformed".to_string()]),
            Err(SinkError::Configuration(_))
        ));
    }
}
