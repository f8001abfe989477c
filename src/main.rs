use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use prometheus::process_collector::ProcessCollector;
use prometheus::Registry;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use cert_exporter::config::{
    AwsConfig, CertRequestsConfig, ClusterScopedConfig, ConfigMapsConfig, ExcludeConfig,
    GlobConfig, PasswordConfig, PrometheusConfig, SecretsConfig,
};
use cert_exporter::discovery::GlobMatcher;
use cert_exporter::metrics::prom;
use cert_exporter::sources::aws::{AwsSecretSource, AwsSecretsClient};
use cert_exporter::sources::certrequests::CertRequestSource;
use cert_exporter::sources::configmaps::ConfigMapSource;
use cert_exporter::sources::files::FileSource;
use cert_exporter::sources::kube::KubeClusterClient;
use cert_exporter::sources::kubeconfig::KubeConfigSource;
use cert_exporter::sources::secrets::SecretSource;
use cert_exporter::sources::webhooks::WebhookSource;
use cert_exporter::sources::{ClusterClient, KeyGlobs};
use cert_exporter::{CertificateSource, Config, ExporterMetrics, PeriodicChecker};

#[derive(Parser, Debug)]
#[command(name = "cert-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long = "generate-config")]
    generate_config: bool,

    /// Glob of certificate files to check (repeatable)
    #[arg(long = "include-cert-glob")]
    include_cert_glob: Vec<String>,

    #[arg(long = "exclude-cert-glob")]
    exclude_cert_glob: Vec<String>,

    /// Glob of kubeconfig files to check (repeatable)
    #[arg(long = "include-kubeconfig-glob")]
    include_kubeconfig_glob: Vec<String>,

    #[arg(long = "exclude-kubeconfig-glob")]
    exclude_kubeconfig_glob: Vec<String>,

    /// Seconds between two checks
    #[arg(long = "polling-period")]
    polling_period: Option<u64>,

    /// Seconds after which a check is abandoned
    #[arg(long = "tick-timeout")]
    tick_timeout: Option<u64>,

    /// Value of the nodename label
    #[arg(long = "node-name", env = "NODE_NAME")]
    node_name: Option<String>,

    /// Kubeconfig used to reach the cluster; in-cluster config when unset
    #[arg(long = "kubeconfig")]
    kubeconfig: Option<String>,

    /// Address of the metrics endpoint, e.g. ":8080"
    #[arg(long = "listen-address")]
    listen_address: Option<String>,

    #[arg(long = "metrics-path")]
    metrics_path: Option<String>,

    /// Leave out process_* metrics
    #[arg(long = "disable-exporter-metrics")]
    disable_exporter_metrics: bool,

    /// Passphrase for PKCS#12 and JKS sources without a matching spec
    #[arg(long = "default-password", env = "CERT_EXPORTER_DEFAULT_PASSWORD", hide_env_values = true)]
    default_password: Option<String>,

    /// `glob:password` pair (repeatable, first match wins)
    #[arg(long = "password-spec")]
    password_spec: Vec<String>,

    #[arg(long = "exclude-cn")]
    exclude_cn: Vec<String>,

    #[arg(long = "exclude-alias")]
    exclude_alias: Vec<String>,

    #[arg(long = "exclude-issuer")]
    exclude_issuer: Vec<String>,

    #[arg(long = "secrets-label-selector")]
    secrets_label_selector: Vec<String>,

    #[arg(long = "secrets-annotation-selector")]
    secrets_annotation_selector: Vec<String>,

    #[arg(long = "secrets-namespace")]
    secrets_namespace: Option<String>,

    /// Comma-separated namespaces
    #[arg(long = "secrets-namespaces")]
    secrets_namespaces: Option<String>,

    /// Secret data keys to check
    #[arg(long = "secrets-include-glob")]
    secrets_include_glob: Vec<String>,

    #[arg(long = "secrets-exclude-glob")]
    secrets_exclude_glob: Vec<String>,

    /// Secret type to check, e.g. kubernetes.io/tls (repeatable)
    #[arg(long = "secret-type")]
    secret_type: Vec<String>,

    #[arg(long = "configmaps-label-selector")]
    configmaps_label_selector: Vec<String>,

    #[arg(long = "configmaps-annotation-selector")]
    configmaps_annotation_selector: Vec<String>,

    #[arg(long = "configmaps-namespace")]
    configmaps_namespace: Option<String>,

    #[arg(long = "configmaps-namespaces")]
    configmaps_namespaces: Option<String>,

    #[arg(long = "configmaps-include-glob")]
    configmaps_include_glob: Vec<String>,

    #[arg(long = "configmaps-exclude-glob")]
    configmaps_exclude_glob: Vec<String>,

    /// Check CA bundles of admission webhook configurations
    #[arg(long = "enable-webhook-cert-check")]
    enable_webhook_cert_check: bool,

    #[arg(long = "webhooks-label-selector")]
    webhooks_label_selector: Vec<String>,

    #[arg(long = "webhooks-annotation-selector")]
    webhooks_annotation_selector: Vec<String>,

    /// Check issued cert-manager CertificateRequests
    #[arg(long = "enable-certrequests-check")]
    enable_certrequests_check: bool,

    #[arg(long = "certrequests-label-selector")]
    certrequests_label_selector: Vec<String>,

    #[arg(long = "certrequests-annotation-selector")]
    certrequests_annotation_selector: Vec<String>,

    #[arg(long = "certrequests-namespace")]
    certrequests_namespace: Option<String>,

    #[arg(long = "certrequests-namespaces")]
    certrequests_namespaces: Option<String>,

    #[arg(long = "aws-account")]
    aws_account: Option<String>,

    #[arg(long = "aws-region")]
    aws_region: Option<String>,

    /// Only keys containing this substring are checked
    #[arg(long = "aws-key-substring")]
    aws_key_substring: Option<String>,

    /// AWS Secrets Manager secret name (repeatable)
    #[arg(long = "aws-secret")]
    aws_secret: Vec<String>,
}

fn opt(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

/// `None` for a section the command line leaves untouched, so file values
/// survive the merge.
fn section<T: Default + PartialEq>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

/// The configuration expressed by command-line flags alone.
fn cli_config(cli: &Cli) -> Config {
    Config {
        polling_period_secs: cli.polling_period,
        tick_timeout_secs: cli.tick_timeout,
        node_name: cli.node_name.clone(),
        kubeconfig: cli.kubeconfig.clone(),
        prometheus: section(PrometheusConfig {
            listen_address: cli.listen_address.clone(),
            path: cli.metrics_path.clone(),
            disable_exporter_metrics: cli.disable_exporter_metrics.then_some(true),
        }),
        passwords: section(PasswordConfig {
            default: cli.default_password.clone(),
            specs: opt(&cli.password_spec),
        }),
        exclude: section(ExcludeConfig {
            cn: opt(&cli.exclude_cn),
            alias: opt(&cli.exclude_alias),
            issuer: opt(&cli.exclude_issuer),
        }),
        files: section(GlobConfig {
            include: opt(&cli.include_cert_glob),
            exclude: opt(&cli.exclude_cert_glob),
        }),
        kubeconfigs: section(GlobConfig {
            include: opt(&cli.include_kubeconfig_glob),
            exclude: opt(&cli.exclude_kubeconfig_glob),
        }),
        secrets: section(SecretsConfig {
            label_selectors: opt(&cli.secrets_label_selector),
            annotation_selectors: opt(&cli.secrets_annotation_selector),
            namespace: cli.secrets_namespace.clone(),
            namespaces: cli.secrets_namespaces.clone(),
            include_keys: opt(&cli.secrets_include_glob),
            exclude_keys: opt(&cli.secrets_exclude_glob),
            types: opt(&cli.secret_type),
        }),
        configmaps: section(ConfigMapsConfig {
            label_selectors: opt(&cli.configmaps_label_selector),
            annotation_selectors: opt(&cli.configmaps_annotation_selector),
            namespace: cli.configmaps_namespace.clone(),
            namespaces: cli.configmaps_namespaces.clone(),
            include_keys: opt(&cli.configmaps_include_glob),
            exclude_keys: opt(&cli.configmaps_exclude_glob),
        }),
        webhooks: section(ClusterScopedConfig {
            enabled: cli.enable_webhook_cert_check.then_some(true),
            label_selectors: opt(&cli.webhooks_label_selector),
            annotation_selectors: opt(&cli.webhooks_annotation_selector),
        }),
        certrequests: section(CertRequestsConfig {
            enabled: cli.enable_certrequests_check.then_some(true),
            label_selectors: opt(&cli.certrequests_label_selector),
            annotation_selectors: opt(&cli.certrequests_annotation_selector),
            namespace: cli.certrequests_namespace.clone(),
            namespaces: cli.certrequests_namespaces.clone(),
        }),
        aws: section(AwsConfig {
            account: cli.aws_account.clone(),
            region: cli.aws_region.clone(),
            key_substring: cli.aws_key_substring.clone(),
            secrets: opt(&cli.aws_secret),
        }),
    }
}

/// Registers the checker of `source` and spawns its loop.
fn start<S>(
    source: S,
    config: &Config,
    metrics: &ExporterMetrics,
    tasks: &mut JoinSet<()>,
) -> Result<()>
where
    S: CertificateSource + 'static,
    S::Candidate: 'static,
{
    let checker = PeriodicChecker::new(source, config.metric_filter(), metrics.clone())?;
    info!(
        source = %checker.kind(),
        period = ?config.polling_period(),
        "Starting periodic checker"
    );
    tasks.spawn(checker.run(config.polling_period(), config.tick_timeout()));
    Ok(())
}

async fn start_cluster_checkers(
    config: &Config,
    metrics: &ExporterMetrics,
    tasks: &mut JoinSet<()>,
) -> Result<()> {
    let client: Arc<dyn ClusterClient> =
        match KubeClusterClient::connect(config.kubeconfig.as_deref().map(Path::new)).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                metrics.record_error();
                error!(error = %e, "Cannot reach the cluster; Kubernetes checks are disabled");
                return Ok(());
            }
        };
    let passwords = config.password_resolver()?;

    if let Some((scope, include, exclude)) = config.secret_check() {
        let keys = KeyGlobs::new(&include, &exclude)?;
        let source = SecretSource::new(
            client.clone(),
            scope,
            keys,
            config.secret_types(),
            passwords.clone(),
        );
        start(source, config, metrics, tasks)?;
    }
    if let Some((scope, include, exclude)) = config.configmap_check() {
        let keys = KeyGlobs::new(&include, &exclude)?;
        let source = ConfigMapSource::new(client.clone(), scope, keys, passwords.clone());
        start(source, config, metrics, tasks)?;
    }
    if let Some(scope) = config.webhook_check() {
        start(WebhookSource::new(client.clone(), scope), config, metrics, tasks)?;
    }
    if let Some(scope) = config.certrequest_check() {
        start(CertRequestSource::new(client, scope), config, metrics, tasks)?;
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::defaults();
    if let Some(path) = &cli.config {
        let file = Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        config = config.merge_with(file);
    }
    let config = config.merge_with(cli_config(cli));
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.generate_config {
        println!("{}", Config::example_toml());
        return Ok(());
    }

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cert_exporter=info".into()),
        )
        .init();

    let config = load_config(&cli)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting cert-exporter");
    cert_exporter::certs::pkcs12::load_legacy_provider();

    let registry = Registry::new();
    if config.exporter_metrics_enabled() {
        registry.register(Box::new(ProcessCollector::for_self()))?;
    }
    let metrics = ExporterMetrics::with_registry(registry.clone())?;
    let node_name = config.node_name();

    let mut tasks = JoinSet::new();
    if let Some((include, exclude)) = config.file_globs() {
        let source = FileSource::new(
            GlobMatcher::new(include, exclude),
            node_name.clone(),
            config.password_resolver()?,
        );
        start(source, &config, &metrics, &mut tasks)?;
    }
    if let Some((include, exclude)) = config.kubeconfig_globs() {
        let source = KubeConfigSource::new(GlobMatcher::new(include, exclude), node_name);
        start(source, &config, &metrics, &mut tasks)?;
    }
    if config.needs_cluster() {
        start_cluster_checkers(&config, &metrics, &mut tasks).await?;
    }
    if let Some(settings) = config.aws_check() {
        let client = AwsSecretsClient::new(&settings.region).await;
        let source = AwsSecretSource::new(Arc::new(client), settings, config.password_resolver()?);
        start(source, &config, &metrics, &mut tasks)?;
    }
    if tasks.is_empty() {
        warn!("No certificate source is configured; only exporter metrics are served");
    }

    let addr = config.listen_address()?;
    let path = config.metrics_path();
    tokio::select! {
        served = prom::serve(addr, &path, registry) => {
            served.with_context(|| format!("Metrics endpoint on {} failed", addr))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
        }
    }
    tasks.shutdown().await;
    Ok(())
}
