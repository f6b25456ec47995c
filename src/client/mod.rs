//! Client session.
//!
//! A [`Client`] owns the backend supervisor and the request channel for one
//! session. Tasks are described with the builders in [`crate::task`],
//! submitted through the client, and observed through [`OutcomeHandle`]s
//! and [`Batch`]es.

pub mod batch;
pub mod handle;
pub mod resolver;
pub mod submitter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::server::process::{BackendLauncher, CommandLauncher};
use crate::server::supervisor::{ChannelProbe, ServerSupervisor};
use crate::shared::channel::Channel;
use crate::task::{EstimateBuilder, RadioBuilder, TaskDescriptor};
use crate::types::adapter::AdapterCredentials;
use crate::types::protocol::RegistrationStatus;

pub use batch::Batch;
pub use handle::OutcomeHandle;
pub use resolver::{EstimateResolver, RadioResolver, ResolveOutcome};
pub use submitter::TaskSubmitter;

/// A session with one AutoMan backend.
///
/// Create it with [`Client::connect`], submit tasks, then call
/// [`Client::close`]. Dropping a client without closing it kills any backend
/// process it started.
///
/// # Examples
///
/// ```no_run
/// use automan_client::{Client, ClientConfig, EstimateBuilder};
/// use std::collections::HashMap;
///
/// # async fn run() -> automan_client::Result<()> {
/// let adapter = HashMap::from([
///     ("access_id".to_string(), "AKIA...".to_string()),
///     ("access_key".to_string(), "...".to_string()),
///     ("type".to_string(), "mturk".to_string()),
///     ("sandbox_mode".to_string(), "true".to_string()),
/// ]);
/// let client = Client::connect(adapter, ClientConfig::default()).await?;
///
/// let handle = client
///     .estimate(EstimateBuilder::new("How many cars are in this parking lot?", 1.50)
///         .image_url("https://example.com/lot.jpg"))
///     .await?;
/// if handle.is_confident(None).await? {
///     handle.print_outcome(None).await?;
/// }
///
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    submitter: TaskSubmitter,
    supervisor: Arc<ServerSupervisor>,
    poll_interval: Duration,
    closed: bool,
}

impl Client {
    /// Start a session: validate inputs, make sure a backend is running,
    /// open the channel and register the adapter.
    ///
    /// # Errors
    ///
    /// Configuration and adapter problems are reported before any I/O.
    /// Startup failures return [`Error::Startup`].
    pub async fn connect(adapter: HashMap<String, String>, config: ClientConfig) -> Result<Self> {
        let launcher = Arc::new(CommandLauncher::new(config.server_binary.clone()));
        Self::connect_with_launcher(adapter, config, launcher).await
    }

    /// Like [`Client::connect`], spawning the backend through `launcher`.
    pub async fn connect_with_launcher(
        adapter: HashMap<String, String>,
        config: ClientConfig,
        launcher: Arc<dyn BackendLauncher>,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let credentials = AdapterCredentials::from_map(adapter, config.log_level, config.logging)?;

        let supervisor = Arc::new(
            ServerSupervisor::new(endpoint.port(), launcher)
                .with_output(config.output_policy()?)
                .with_max_attempts(config.max_connect_attempts)
                .with_retry_interval(config.retry_interval()),
        );

        let probe = ChannelProbe::new(endpoint.clone());
        supervisor.ensure_running(&probe).await?;
        let channel = match probe.take_channel() {
            Some(channel) => channel,
            None => Channel::connect(&endpoint).await?,
        };

        match channel.register_adapter(&credentials).await? {
            RegistrationStatus::Okay => {
                info!(adapter = ?credentials.adapter_type(), "adapter registered");
            },
            RegistrationStatus::Failed => {
                return Err(Error::adapter("backend rejected the adapter registration"));
            },
            RegistrationStatus::Undefined => return Err(Error::ProtocolVersion),
        }

        let mut client = Self::from_parts(channel, supervisor);
        client.poll_interval = config.poll_interval();
        Ok(client)
    }

    /// Assemble a session from an open channel and a supervisor, without
    /// probing, spawning or registering anything.
    pub fn from_parts(channel: Channel, supervisor: Arc<ServerSupervisor>) -> Self {
        Self {
            submitter: TaskSubmitter::new(channel, supervisor.clone()),
            supervisor,
            poll_interval: Duration::from_millis(ClientConfig::default().poll_interval_ms),
            closed: false,
        }
    }

    /// The session's channel.
    pub fn channel(&self) -> &Channel {
        self.submitter.channel()
    }

    /// The session's supervisor.
    pub fn supervisor(&self) -> &Arc<ServerSupervisor> {
        &self.supervisor
    }

    /// Scan interval for [`Batch::as_completed_polling`] from the configuration.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Build and submit an estimate task.
    pub async fn estimate(&self, builder: EstimateBuilder) -> Result<OutcomeHandle> {
        let descriptor = builder.build()?;
        self.submit(&descriptor).await
    }

    /// Build and submit a radio task.
    pub async fn radio(&self, builder: RadioBuilder) -> Result<OutcomeHandle> {
        let descriptor = builder.build()?;
        self.submit(&descriptor).await
    }

    /// Submit a prepared descriptor.
    pub async fn submit(&self, descriptor: &TaskDescriptor) -> Result<OutcomeHandle> {
        if self.closed {
            return Err(Error::Transport("session is closed".to_string()));
        }
        self.submitter.submit(descriptor).await
    }

    /// Submit one estimate per image URL, sharing every other parameter of
    /// `template`. The batch follows URL order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] for fewer than two URLs or an invalid
    /// template; nothing is submitted in that case.
    pub async fn estimate_batch<I, S>(&self, template: EstimateBuilder, image_urls: I) -> Result<Batch>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<S> = image_urls.into_iter().collect();
        if urls.len() < 2 {
            return Err(Error::argument(
                "batch estimation requires a list of at least 2 image urls",
            ));
        }
        let descriptors = urls
            .iter()
            .map(|url| template.with_image_url(url.as_ref()).build())
            .collect::<Result<Vec<_>>>()?;

        let mut handles = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            handles.push(self.submit(descriptor).await?);
        }
        debug!(tasks = handles.len(), "estimate batch submitted");
        Ok(Batch::new(handles))
    }

    /// Orderly shutdown: ask the backend to exit.
    ///
    /// Resolve or abandon all handles first; requests still in flight are
    /// orphaned and a warning is logged.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.supervisor.shutdown(self.submitter.channel()).await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.closed && self.supervisor.is_process_alive() {
            warn!("client dropped without close(), killing backend");
            self.supervisor.force_kill();
        }
    }
}
