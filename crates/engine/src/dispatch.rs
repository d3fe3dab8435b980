//! Binds adapters into kube-runtime controllers, one per kind.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::events::Reporter;
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

use forgeplane_kubehub::{Connector, KubeConnector, KubeStore};

use crate::adapter::ExternalResource;
use crate::error::ReconcileError;
use crate::reconcile::{reconcile, Binding, Requeue};
use crate::settings::Settings;

/// Field manager / event reporter name.
pub const CONTROLLER_NAME: &str = "forgeplane";

type Signal = Shared<BoxFuture<'static, ()>>;

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "manager: SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Owns every registered controller and the shared shutdown signal.
pub struct Manager {
    client: Client,
    connector: Arc<dyn Connector>,
    settings: Settings,
    shutdown: Signal,
    controllers: Vec<(String, BoxFuture<'static, ()>)>,
}

impl Manager {
    pub fn new(client: Client, settings: Settings) -> Self {
        let connector: Arc<dyn Connector> = Arc::new(KubeConnector::new(client.clone()));
        Self::with_parts(client, connector, settings, shutdown_signal().boxed())
    }

    pub fn with_parts(
        client: Client,
        connector: Arc<dyn Connector>,
        settings: Settings,
        shutdown: BoxFuture<'static, ()>,
    ) -> Self {
        Self { client, connector, settings, shutdown: shutdown.shared(), controllers: Vec::new() }
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    /// Start watching `A::Managed` once [`Manager::run`] is awaited.
    pub fn register<A: ExternalResource>(&mut self, adapter: A) {
        let kind = <A::Managed as Resource>::kind(&()).to_string();
        let reporter = Reporter { controller: CONTROLLER_NAME.to_string(), instance: None };
        let store = Arc::new(KubeStore::<A::Managed>::new(self.client.clone(), reporter));
        let binding = Arc::new(Binding::new(adapter, store, self.connector.clone(), self.settings.clone()));

        let api: Api<A::Managed> = Api::all(self.client.clone());
        let cfg = controller::Config::default().concurrency(concurrency(self.settings.workers));
        let label = kind.clone();
        let fut = Controller::new(api, watcher::Config::default())
            .with_config(cfg)
            .graceful_shutdown_on(self.shutdown.clone())
            .run(reconcile_one::<A>, error_policy::<A>, binding)
            .for_each(move |res| {
                match res {
                    Ok((obj, action)) => debug!(kind = %label, name = %obj.name, ?action, "manager: reconciled"),
                    Err(controller::Error::ReconcilerFailed(_, obj)) => {
                        debug!(kind = %label, name = %obj.name, "manager: reconcile failed, requeued")
                    }
                    Err(e) => warn!(kind = %label, error = %e, "manager: controller error"),
                }
                futures::future::ready(())
            })
            .boxed();
        info!(kind = %kind, workers = self.settings.workers, "manager: controller registered");
        self.controllers.push((kind, fut));
    }

    pub fn kinds(&self) -> Vec<&str> { self.controllers.iter().map(|(k, _)| k.as_str()).collect() }

    /// Drive every controller until shutdown; in-flight cycles get `shutdown_grace` to finish.
    pub async fn run(self) {
        let grace = self.settings.shutdown_grace;
        let all = futures::future::join_all(self.controllers.into_iter().map(|(_, f)| f));
        tokio::pin!(all);
        tokio::select! {
            _ = &mut all => {}
            _ = self.shutdown.clone() => {
                info!(grace_secs = grace.as_secs(), "manager: shutdown requested, draining");
                if tokio::time::timeout(grace, &mut all).await.is_err() {
                    warn!("manager: grace period elapsed with cycles still in flight");
                }
            }
        }
        info!("manager: stopped");
    }
}

/// kube-runtime reads 0 as unbounded; keep at least one worker and saturate large values.
fn concurrency(workers: usize) -> u16 { u16::try_from(workers.max(1)).unwrap_or(u16::MAX) }

async fn reconcile_one<A: ExternalResource>(
    obj: Arc<A::Managed>,
    binding: Arc<Binding<A>>,
) -> Result<Action, ReconcileError> {
    let name = obj.name_any();
    let requeue = reconcile(&binding, &name).await?;
    binding.backoff.reset(&name);
    Ok(match requeue {
        Requeue::Done => Action::await_change(),
        Requeue::After(d) => Action::requeue(d),
    })
}

fn error_policy<A: ExternalResource>(obj: Arc<A::Managed>, err: &ReconcileError, binding: Arc<Binding<A>>) -> Action {
    match binding.backoff.next_delay(&obj.name_any(), err.retry()) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_never_wraps_to_unbounded() {
        assert_eq!(concurrency(4), 4);
        assert_eq!(concurrency(0), 1);
        assert_eq!(concurrency(65_536), u16::MAX);
        assert_eq!(concurrency(usize::MAX), u16::MAX);
    }
}
