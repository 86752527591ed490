use crate::{
    core::{self, Config, TunnelConfig, TunnelMode, WafConfig},
    index::Index,
    k8s::{
        envoy::EnvoyPatchPolicy,
        gateway::{Gateway, HttpRoute},
        labels,
        networking::{Connector, HttpProxy, TrafficProtectionPolicy},
    },
    lease, status,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

const RECONCILIATION_PERIOD: Duration = Duration::from_secs(10);

// The maximum number of writes to buffer. As a conservative estimate, we
// assume that each write takes at least 1ms, so the buffer holds as many
// writes as can be made in a reconciliation period.
const UPDATE_QUEUE_SIZE: usize = RECONCILIATION_PERIOD.as_millis() as usize;

#[derive(Debug, Parser)]
#[clap(
    name = "gateway-controller",
    about = "Attaches traffic protection and connector tunnels to Gateways"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "gateway_controller=info,warn",
        env = "GATEWAY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Name written into the `controllerName` of policy ancestor statuses.
    #[clap(long, default_value = core::DEFAULT_CONTROLLER_NAME)]
    controller_name: String,

    /// Namespace in which all generated EnvoyPatchPolicies are created.
    ///
    /// By default they are created in the namespace of the resources they
    /// were generated from.
    #[clap(long)]
    downstream_namespace: Option<String>,

    /// Namespace of the controller's deployment, where the write Lease lives.
    #[clap(long, default_value = "datum-system")]
    controller_namespace: String,

    #[clap(long, default_value = "gateway-controller")]
    controller_deployment_name: String,

    /// Name of the Lease that elects the replica allowed to write.
    #[clap(long, default_value = "gateway-controller-write")]
    lease_name: String,

    #[clap(long, default_value = "30")]
    lease_duration_secs: u64,

    /// Directives that seed every compiled WAF directive list. May be
    /// repeated. Defaults to the recommended Coraza and CRS setup includes.
    #[clap(long = "waf-base-directive")]
    waf_base_directives: Vec<String>,

    #[clap(long)]
    waf_library_path: Option<String>,

    /// Either `internal-listener` or `header-injection`.
    #[clap(long, default_value = "internal-listener")]
    tunnel_mode: TunnelMode,

    #[clap(long)]
    tunnel_gateway_cluster: Option<String>,

    #[clap(long)]
    tunnel_internal_listener: Option<String>,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();
        let Self {
            admin,
            client,
            log_level,
            log_format,
            downstream_namespace,
            controller_namespace,
            controller_deployment_name,
            lease_name,
            lease_duration_secs,
            patch_timeout_ms,
            ..
        } = self;

        let mut prom = <Registry>::default();
        let status_metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("gateway_controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").expect("Failed to fetch `HOSTNAME` environment variable");

        let write_lease = lease::WriteLease {
            name: lease_name,
            duration: Duration::from_secs(lease_duration_secs),
            ..lease::WriteLease::new(controller_namespace)
        };
        let claims = write_lease
            .init(&runtime, &controller_deployment_name, &hostname)
            .await?;

        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE_SIZE);
        let index = Index::shared(
            hostname.clone(),
            claims.clone(),
            updates_tx,
            config,
            downstream_namespace,
        );

        // Spawn resource watches.

        let gateways = runtime.watch_all::<Gateway>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), gateways).instrument(info_span!("gateways")),
        );

        let http_routes = runtime.watch_all::<HttpRoute>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), http_routes)
                .instrument(info_span!("httproutes")),
        );

        let policies = runtime.watch_all::<TrafficProtectionPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), policies)
                .instrument(info_span!("trafficprotectionpolicies")),
        );

        let proxies = runtime.watch_all::<HttpProxy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), proxies).instrument(info_span!("httpproxies")),
        );

        let connectors = runtime.watch_all::<Connector>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), connectors)
                .instrument(info_span!("connectors")),
        );

        // Only documents created by this controller are observed.
        let documents = runtime.watch_all::<EnvoyPatchPolicy>(
            watcher::Config::default().labels(&format!(
                "{}={}",
                labels::MANAGED_BY,
                labels::MANAGED_BY_VALUE
            )),
        );
        tokio::spawn(
            kubert::index::namespaced(index.clone(), documents)
                .instrument(info_span!("envoypatchpolicies")),
        );

        tokio::spawn(
            Index::run(index.clone(), RECONCILIATION_PERIOD).instrument(info_span!("index")),
        );

        let controller = status::Controller::new(
            claims,
            runtime.client(),
            hostname,
            updates_rx,
            Duration::from_millis(patch_timeout_ms),
            status_metrics,
        );
        tokio::spawn(controller.run().instrument(info_span!("controller")));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }

    fn config(&self) -> Config {
        let waf = WafConfig::default();
        let tunnel = TunnelConfig::default();
        Config {
            controller_name: self.controller_name.clone(),
            waf: WafConfig {
                base_directives: if self.waf_base_directives.is_empty() {
                    waf.base_directives
                } else {
                    self.waf_base_directives.clone()
                },
                library_path: self.waf_library_path.clone().unwrap_or(waf.library_path),
            },
            tunnel: TunnelConfig {
                mode: self.tunnel_mode,
                gateway_cluster: self
                    .tunnel_gateway_cluster
                    .clone()
                    .unwrap_or(tunnel.gateway_cluster),
                internal_listener: self
                    .tunnel_internal_listener
                    .clone()
                    .unwrap_or(tunnel.internal_listener),
            },
        }
    }
}
