use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::warn;

use crate::SubgraphConfig;
use crate::error::ConfigError;

/// Prefix of the environment variables that name subgraphs, as in
/// `FEDERATED_SERVICES_PRODUCTS=http://products:8000/graphql`.
pub const SUBGRAPH_ENV_PREFIX: &str = "FEDERATED_SERVICES_";

/// fedgate - GraphQL federation gateway.
///
/// Subgraph order decides which subgraph resolves a field several of them
/// own. YAML entries keep file order, `--subgraph` flags follow, and
/// `FEDERATED_SERVICES_<NAME>` variables come last sorted by name.
/// `--subgraph-order` overrides all of that.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "fedgate")]
#[command(about = "Composes GraphQL subgraphs into one supergraph and serves it")]
#[command(version)]
pub struct Args {
    /// HTTP port to listen on.
    #[arg(long, env = "PORT", default_value_t = 4000)]
    pub port: u16,

    /// Subgraph to federate, as NAME=URL. Repeatable.
    #[arg(long = "subgraph", value_name = "NAME=URL")]
    pub subgraphs: Vec<String>,

    /// Comma-separated subgraph names to prefer, first wins. Subgraphs not
    /// listed keep their order after these. FEDERATED_SERVICES_* subgraphs
    /// are otherwise sorted by name.
    #[arg(long, env = "SUBGRAPH_ORDER", value_delimiter = ',', value_name = "NAMES")]
    pub subgraph_order: Vec<String>,

    /// YAML file listing subgraphs and optional static schema files.
    #[arg(long, env = "SUPERGRAPH_CONFIG")]
    pub supergraph_config: Option<PathBuf>,

    /// Deadline for a whole client request, subgraph calls included.
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    /// Re-introspect subgraphs every N seconds. 0 or unset disables polling.
    #[arg(long, env = "POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,

    /// Return the query plan under `extensions.queryPlan`.
    #[arg(long, env = "EXPOSE_QUERY_PLAN")]
    pub expose_query_plan: bool,
}

#[derive(Debug, Deserialize)]
struct SupergraphConfig {
    subgraphs: IndexMap<String, SubgraphEntry>,
}

#[derive(Debug, Deserialize)]
struct SubgraphEntry {
    routing_url: String,
    #[serde(default)]
    schema: Option<SchemaSource>,
}

#[derive(Debug, Deserialize)]
struct SchemaSource {
    file: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub port: u16,
    pub subgraphs: Vec<SubgraphConfig>,
    pub request_timeout: Duration,
    pub poll_interval: Option<Duration>,
    pub expose_query_plan: bool,
}

impl GatewayConfig {
    /// Builds the gateway configuration from parsed arguments and the
    /// process environment.
    ///
    /// Subgraphs come from the YAML file first, then `--subgraph` flags, then
    /// `FEDERATED_SERVICES_<NAME>` variables sorted by name. When a name shows
    /// up twice the first definition is kept.
    pub fn resolve(
        args: &Args,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let mut subgraphs = Vec::new();
        if let Some(path) = &args.supergraph_config {
            subgraphs.extend(load_supergraph_config(path)?);
        }
        for flag in &args.subgraphs {
            subgraphs.push(parse_subgraph_flag(flag)?);
        }
        subgraphs.extend(subgraphs_from_env(env));

        let mut unique: Vec<SubgraphConfig> = Vec::with_capacity(subgraphs.len());
        for subgraph in subgraphs {
            if unique.iter().any(|existing| existing.name == subgraph.name) {
                warn!(
                    subgraph = %subgraph.name,
                    url = %subgraph.url,
                    "ignoring duplicate subgraph definition"
                );
                continue;
            }
            unique.push(subgraph);
        }
        if unique.is_empty() {
            return Err(ConfigError::NoSubgraphs);
        }
        apply_order(&mut unique, &args.subgraph_order);

        Ok(GatewayConfig {
            port: args.port,
            subgraphs: unique,
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            poll_interval: args
                .poll_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            expose_query_plan: args.expose_query_plan,
        })
    }
}

/// Reads a supergraph YAML file. Schema files are resolved relative to the
/// directory holding the config.
pub fn load_supergraph_config(path: &Path) -> Result<Vec<SubgraphConfig>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: SupergraphConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    config
        .subgraphs
        .into_iter()
        .map(|(name, entry)| {
            let subgraph = SubgraphConfig::new(name, entry.routing_url);
            match entry.schema {
                Some(schema) => {
                    let schema_path = base_dir.join(schema.file);
                    let sdl = fs::read_to_string(&schema_path).map_err(|source| ConfigError::Read {
                        path: schema_path,
                        source,
                    })?;
                    Ok(subgraph.with_sdl(sdl))
                }
                None => Ok(subgraph),
            }
        })
        .collect()
}

/// Moves the subgraphs named in `order` to the front, in that order.
fn apply_order(subgraphs: &mut [SubgraphConfig], order: &[String]) {
    for name in order {
        if !subgraphs.iter().any(|subgraph| &subgraph.name == name) {
            warn!(subgraph = %name, "subgraph order names an unknown subgraph");
        }
    }
    subgraphs.sort_by_key(|subgraph| {
        order
            .iter()
            .position(|name| *name == subgraph.name)
            .unwrap_or(usize::MAX)
    });
}

fn parse_subgraph_flag(flag: &str) -> Result<SubgraphConfig, ConfigError> {
    match flag.split_once('=') {
        Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
            Ok(SubgraphConfig::new(name.trim(), url.trim()))
        }
        _ => Err(ConfigError::InvalidSubgraph(flag.to_string())),
    }
}

fn subgraphs_from_env(env: impl IntoIterator<Item = (String, String)>) -> Vec<SubgraphConfig> {
    let mut subgraphs: Vec<SubgraphConfig> = env
        .into_iter()
        .filter_map(|(key, url)| {
            let name = key.strip_prefix(SUBGRAPH_ENV_PREFIX)?;
            let usable = !name.is_empty() && !url.is_empty();
            usable.then(|| SubgraphConfig::new(name.to_lowercase(), url))
        })
        .collect();
    subgraphs.sort_by(|a, b| a.name.cmp(&b.name));
    subgraphs
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn example_config() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas/supergraph.yaml")
    }

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn defaults_come_from_clap() {
        let args =
            Args::parse_from(["fedgate", "--subgraph", "products=http://localhost:8001/graphql"]);
        let config = GatewayConfig::resolve(&args, Vec::new()).unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, None);
        assert!(!config.expose_query_plan);
        assert_eq!(
            config.subgraphs,
            vec![SubgraphConfig::new("products", "http://localhost:8001/graphql")]
        );
    }

    #[test]
    fn reads_subgraphs_from_the_environment() {
        let args = Args::parse_from(["fedgate", "--poll-interval-secs", "15"]);
        let config = GatewayConfig::resolve(
            &args,
            env(&[
                ("PATH", "/usr/bin"),
                ("FEDERATED_SERVICES_PRODUCTS", "http://products:8000/graphql"),
                ("FEDERATED_SERVICES_IMAGES", "http://images:8000/graphql"),
            ]),
        )
        .unwrap();

        assert_eq!(
            config.subgraphs,
            vec![
                SubgraphConfig::new("images", "http://images:8000/graphql"),
                SubgraphConfig::new("products", "http://products:8000/graphql"),
            ]
        );
        assert_eq!(config.poll_interval, Some(Duration::from_secs(15)));
    }

    #[test]
    fn subgraph_order_overrides_the_sorted_environment() {
        let args = Args::parse_from(["fedgate", "--subgraph-order", "products,reviews"]);
        let config = GatewayConfig::resolve(
            &args,
            env(&[
                ("FEDERATED_SERVICES_IMAGES", "http://images:8000/graphql"),
                ("FEDERATED_SERVICES_ACCOUNTS", "http://accounts:8000/graphql"),
                ("FEDERATED_SERVICES_PRODUCTS", "http://products:8000/graphql"),
            ]),
        )
        .unwrap();

        let names: Vec<&str> = config
            .subgraphs
            .iter()
            .map(|subgraph| subgraph.name.as_str())
            .collect();
        assert_eq!(names, ["products", "accounts", "images"]);
    }

    #[test]
    fn yaml_keeps_file_order_and_loads_static_schemas() {
        let subgraphs = load_supergraph_config(&example_config()).unwrap();

        let names: Vec<&str> = subgraphs.iter().map(|subgraph| subgraph.name.as_str()).collect();
        assert_eq!(names, ["products", "images"]);
        assert!(
            subgraphs[0]
                .sdl
                .as_deref()
                .is_some_and(|sdl| sdl.contains("type ProductType"))
        );
    }

    #[test]
    fn earlier_sources_win_on_duplicate_names() {
        let args = Args {
            supergraph_config: Some(example_config()),
            subgraphs: vec!["products=http://override/graphql".into()],
            poll_interval_secs: Some(0),
            ..Args::default()
        };
        let config = GatewayConfig::resolve(
            &args,
            env(&[("FEDERATED_SERVICES_REVIEWS", "http://reviews/graphql")]),
        )
        .unwrap();

        let products = &config.subgraphs[0];
        assert_eq!(products.name, "products");
        assert_ne!(products.url, "http://override/graphql");
        assert_eq!(config.subgraphs.len(), 3);
        assert_eq!(config.subgraphs[2].name, "reviews");
        assert_eq!(config.poll_interval, None);
    }

    #[test]
    fn rejects_bad_subgraph_flags_and_empty_configs() {
        let args = Args::parse_from(["fedgate", "--subgraph", "products"]);
        assert!(matches!(
            GatewayConfig::resolve(&args, Vec::new()),
            Err(ConfigError::InvalidSubgraph(flag)) if flag == "products"
        ));

        let args = Args::parse_from(["fedgate"]);
        assert!(matches!(
            GatewayConfig::resolve(&args, Vec::new()),
            Err(ConfigError::NoSubgraphs)
        ));
    }

    #[test]
    fn missing_config_files_are_reported() {
        let error = load_supergraph_config(Path::new("does/not/exist.yaml")).unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }), "{error}");
    }
}
