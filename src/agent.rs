//! CrowdSec agent implementation.

use crate::cache::ReputationCache;
use crate::config::{Config, IpExtractionConfig};
use crate::request::GateRequest;
use crate::settings::{LocationScope, Scopes, ServerSettings, VirtualHost};
use crate::upstream::http::HttpTransport;
use crate::upstream::{DecisionTransport, QueryExecutor, QueryOutcome};
use crate::verdict::Verdict;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Classification the service returns for an IP with no decision.
const NO_DECISION: &str = "null";

/// Everything a request needs from its server scope.
struct ServerRuntime {
    /// Effective settings, main server merged with the vhost.
    settings: ServerSettings,
    cache: Arc<ReputationCache>,
    executor: QueryExecutor,
}

/// CrowdSec agent.
pub struct CrowdsecAgent {
    scopes: Scopes,
    ip_extraction: IpExtractionConfig,
    main: ServerRuntime,
    /// One per `scopes.virtual_hosts`, same order.
    virtual_hosts: Vec<ServerRuntime>,
}

impl CrowdsecAgent {
    /// Create an agent that talks to the decision service over HTTP.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Self::build(config, |settings| {
            let transport: Arc<dyn DecisionTransport> = Arc::new(HttpTransport::new(
                settings.request_timeout(),
                settings.connect_timeout(),
            )?);
            Ok(transport)
        })
    }

    /// Create an agent whose every scope uses `transport`.
    pub fn with_transport(
        config: Config,
        transport: Arc<dyn DecisionTransport>,
    ) -> anyhow::Result<Self> {
        Self::build(config, |_| Ok(transport.clone()))
    }

    fn build<F>(config: Config, make_transport: F) -> anyhow::Result<Self>
    where
        F: Fn(&ServerSettings) -> anyhow::Result<Arc<dyn DecisionTransport>>,
    {
        let scopes = config.scopes()?;

        let main_cache = Arc::new(open_cache(&scopes.server, "main server")?);
        let main = ServerRuntime {
            settings: scopes.server.clone(),
            cache: main_cache.clone(),
            executor: QueryExecutor::new(make_transport(&scopes.server)?),
        };
        warn_ignored_path(&scopes.server, "main server");
        warn_declined(&main.settings, "main server", &scopes.locations);

        let mut virtual_hosts = Vec::with_capacity(scopes.virtual_hosts.len());
        for vhost in &scopes.virtual_hosts {
            let settings = scopes.server_for(Some(vhost));

            // Only a vhost that names its own provider gets its own instance.
            let cache = if vhost.server.cache.is_some() {
                Arc::new(open_cache(&settings, &vhost.server_name)?)
            } else {
                main_cache.clone()
            };

            warn_ignored_path(&vhost.server, &vhost.server_name);
            warn_declined(&settings, &vhost.server_name, &scopes.locations);
            warn_declined(&settings, &vhost.server_name, &vhost.locations);

            virtual_hosts.push(ServerRuntime {
                executor: QueryExecutor::new(make_transport(&settings)?),
                settings,
                cache,
            });
        }

        let url = main
            .settings
            .api_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unset>".to_string());

        info!(
            url = %url,
            cache = main.cache.provider_name().unwrap_or("disabled"),
            locations = scopes.locations.len(),
            virtual_hosts = scopes.virtual_hosts.len(),
            "CrowdSec agent initialized"
        );

        Ok(Self {
            scopes,
            ip_extraction: config.ip_extraction,
            main,
            virtual_hosts,
        })
    }

    /// Client IP extraction settings, for building [`GateRequest`]s from
    /// connection peers.
    pub fn ip_extraction(&self) -> &IpExtractionConfig {
        &self.ip_extraction
    }

    /// Select the virtual host and server runtime for `request`.
    fn server_for(&self, request: &GateRequest) -> (Option<&VirtualHost>, &ServerRuntime) {
        match self.scopes.virtual_host_index(request.server_name().as_deref()) {
            Some(i) => (Some(&self.scopes.virtual_hosts[i]), &self.virtual_hosts[i]),
            None => (None, &self.main),
        }
    }

    /// Decide whether `request` may proceed.
    pub async fn decide(&self, request: &GateRequest) -> Verdict {
        if request.is_internal() {
            return Verdict::Allow;
        }

        let (vhost, server) = self.server_for(request);
        let route = self.scopes.route_for(vhost, request.path());

        if !route.enabled() {
            return Verdict::Allow;
        }

        if server.settings.api_url.is_none() {
            debug!(path = %request.path(), "No CrowdSec url for this scope, request declined");
            return Verdict::Allow;
        }

        let ip = request.client_ip();

        let classification = match server.cache.get(ip) {
            Some(cached) => cached,
            None => match server.executor.query(&server.settings, ip, route.fallback()).await {
                QueryOutcome::Answer(body) => {
                    server.cache.put(ip, &body, server.settings.cache_timeout());
                    body
                }
                QueryOutcome::Fallback(body) => body,
                QueryOutcome::Reject(verdict) => return verdict,
            },
        };

        if !is_blocked(&classification) {
            debug!(ip = %ip, "Client not blocked");
            return Verdict::Allow;
        }

        let status = route.blocked_status();

        let verdict = match route.location() {
            Some(expr) => match expr.evaluate(request) {
                Ok(location) => Verdict::Redirect { status, location },
                Err(e) => {
                    error!(
                        ip = %ip,
                        expr = %expr,
                        error = %e,
                        "Failure while evaluating the blocked location expression"
                    );
                    return Verdict::internal_error();
                }
            },
            None => Verdict::Block { status },
        };

        info!(
            ip = %ip,
            path = %request.path(),
            status = status,
            reason = %classification,
            "Client blocked by CrowdSec"
        );

        verdict
    }
}

/// Anything other than exactly the no-decision sentinel blocks, an empty or
/// padded body included.
fn is_blocked(classification: &str) -> bool {
    classification != NO_DECISION
}

fn open_cache(settings: &ServerSettings, scope: &str) -> anyhow::Result<ReputationCache> {
    match settings.cache {
        Some(ref spec) => {
            let cache = ReputationCache::open(spec, scope)
                .map_err(|e| anyhow::anyhow!("{}: cache '{}': {}", scope, spec, e))?;
            info!(scope = scope, provider = %spec, "Cache enabled");
            Ok(cache)
        }
        None => Ok(ReputationCache::disabled()),
    }
}

/// Logged once per scope that sets the url itself.
fn warn_ignored_path(own: &ServerSettings, scope: &str) {
    if let Some(url) = own.api_url.as_ref().filter(|u| u.has_ignored_path()) {
        warn!(
            scope = scope,
            path = url.path.as_deref().unwrap_or_default(),
            "LAPI url path was found and will be ignored"
        );
    }
}

fn warn_declined(settings: &ServerSettings, scope: &str, locations: &[LocationScope]) {
    if settings.api_url.is_some() {
        return;
    }

    for location in locations.iter().filter(|l| l.settings.enabled == Some(true)) {
        warn!(
            scope = scope,
            path = %location.prefix,
            "CrowdSec is enabled but no url is configured, requests will be allowed"
        );
    }
}
