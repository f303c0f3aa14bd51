//! Classifier lifecycle management
//!
//! Loads the traffic-classifier eBPF object, installs it on an interface's
//! ingress and egress paths through a clsact qdisc, hands out the perf
//! event array while running, and tears everything down best-effort on
//! close.

use anyhow::{bail, Context, Result};
use aya::{
    maps::perf::AsyncPerfEventArray,
    maps::MapData,
    programs::{
        tc::{self, SchedClassifierLinkId},
        SchedClassifier, TcAttachType,
    },
    Bpf,
};
use aya_log::BpfLogger;
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::path::PathBuf;

use flowlat_common::constants::{CLASSIFIER_PROG, EVENTS_MAP};

/// Lifecycle of one probe run
///
/// `Failed` is terminal and reachable from any attach step; cleanup of the
/// steps that did succeed stays the caller's responsibility via
/// [`Probe::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Created,
    Attached,
    Running,
    Closed,
    Failed,
}

/// A loaded classifier bound to one interface
pub struct Probe {
    iface: String,
    ebpf: Option<Bpf>,
    links: Vec<(TcAttachType, SchedClassifierLinkId)>,
    state: ProbeState,
}

impl Probe {
    /// Load the classifier object into the kernel program cache
    ///
    /// # Arguments
    ///
    /// * `iface` - Interface name the filters will be bound to
    /// * `path` - Optional path to the classifier object file. If None,
    ///   uses embedded bytecode (requires the `embedded` feature).
    pub fn load(iface: &str, path: Option<PathBuf>) -> Result<Self> {
        info!("Loading classifier...");

        let mut ebpf = if let Some(obj_path) = path {
            info!("Loading classifier object from: {:?}", obj_path);
            let data = std::fs::read(&obj_path)
                .with_context(|| format!("Failed to read classifier object file: {:?}", obj_path))?;
            Bpf::load(&data).context("Failed to load classifier")?
        } else {
            #[cfg(feature = "embedded")]
            {
                info!("Loading embedded classifier...");
                let data = aya::include_bytes_aligned!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/../target/bpfel-unknown-none/release/flowlat"
                ));
                Bpf::load(data).context("Failed to load embedded classifier")?
            }
            #[cfg(not(feature = "embedded"))]
            {
                bail!(
                    "No classifier object file provided. Use --ebpf-object or compile with 'embedded' feature"
                );
            }
        };

        // Kernel-side logging from the classifier is nice to have, not
        // required for the probe to work
        if let Err(e) = BpfLogger::init(&mut ebpf) {
            warn!("  ⚠ classifier logger unavailable: {e}");
        }

        info!("Classifier loaded successfully");

        Ok(Self {
            iface: iface.to_string(),
            ebpf: Some(ebpf),
            links: Vec::new(),
            state: ProbeState::Created,
        })
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Install the classifier on the interface's ingress and egress paths
    ///
    /// Creates the clsact qdisc (a pre-existing one is kept), then binds
    /// one filter per direction, each covering both IPv4 and IPv6 traffic.
    /// Filters left behind by a previous run are replaced. The first
    /// unrecoverable failure aborts attachment and flips the probe to
    /// `Failed`; earlier steps are cleaned up by `close`.
    pub fn attach(&mut self) -> Result<()> {
        if self.state != ProbeState::Created {
            bail!("attach called in state {:?}", self.state);
        }

        match self.attach_steps() {
            Ok(()) => {
                self.state = ProbeState::Attached;
                Ok(())
            }
            Err(e) => {
                self.state = ProbeState::Failed;
                Err(e)
            }
        }
    }

    fn attach_steps(&mut self) -> Result<()> {
        let ebpf = self.ebpf.as_mut().context("classifier not loaded")?;

        let program: &mut SchedClassifier = ebpf
            .program_mut(CLASSIFIER_PROG)
            .with_context(|| format!("{CLASSIFIER_PROG} program not found in classifier object"))?
            .try_into()
            .context("Failed to get classifier as SchedClassifier")?;
        program
            .load()
            .context("Failed to load classifier program")?;
        info!("  ✓ Verified and loaded classifier program");

        info!("Creating clsact qdisc on {}", self.iface);
        match tc::qdisc_add_clsact(&self.iface) {
            Ok(()) => info!("  ✓ Created clsact qdisc"),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("clsact qdisc already present on {}, keeping it", self.iface);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to create clsact qdisc on {}", self.iface)
                });
            }
        }

        info!("Creating qdisc filters");
        for attach_type in [TcAttachType::Ingress, TcAttachType::Egress] {
            // Replace semantics: purge any filter a crashed run left behind
            if tc::qdisc_detach_program(&self.iface, attach_type, CLASSIFIER_PROG).is_ok() {
                debug!("replaced stale {attach_type:?} filter on {}", self.iface);
            }

            let link_id = program.attach(&self.iface, attach_type).with_context(|| {
                format!("Failed to attach {attach_type:?} filter on {}", self.iface)
            })?;
            self.links.push((attach_type, link_id));
            info!("  ✓ Attached {attach_type:?} filter");
        }

        Ok(())
    }

    /// Hand the record stream to the pipeline
    ///
    /// Valid once attached; the probe counts as running afterwards.
    pub fn take_event_array(&mut self) -> Result<AsyncPerfEventArray<MapData>> {
        if !matches!(self.state, ProbeState::Attached | ProbeState::Running) {
            bail!("event stream requested in state {:?}", self.state);
        }

        let map = self
            .ebpf
            .as_mut()
            .context("classifier not loaded")?
            .take_map(EVENTS_MAP)
            .with_context(|| format!("{EVENTS_MAP} map not found in classifier object"))?;

        let events =
            AsyncPerfEventArray::try_from(map).context("Failed to create perf event array")?;
        self.state = ProbeState::Running;
        Ok(events)
    }

    /// Best-effort teardown of all kernel resources
    ///
    /// Every step is attempted regardless of earlier failures; failures
    /// are logged and the first one is returned for visibility. Detaching
    /// the filters stops traffic classification; dropping the loaded
    /// object then releases the program and map handles.
    pub fn close(mut self) -> Result<()> {
        info!("Removing qdisc filters");

        let mut outcome = Ok(());
        let links = std::mem::take(&mut self.links);

        for (attach_type, link_id) in links {
            let detached = self
                .ebpf
                .as_mut()
                .context("classifier not loaded")
                .and_then(|ebpf| {
                    let program: &mut SchedClassifier = ebpf
                        .program_mut(CLASSIFIER_PROG)
                        .context("classifier program vanished")?
                        .try_into()
                        .context("Failed to get classifier as SchedClassifier")?;
                    program
                        .detach(link_id)
                        .with_context(|| format!("Failed to detach {attach_type:?} filter"))
                });

            match detached {
                Ok(()) => info!("  ✓ Detached {attach_type:?} filter"),
                Err(e) => {
                    warn!("  ⚠ {e:#}");
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
        }

        info!("Releasing classifier object");
        drop(self.ebpf.take());

        self.state = ProbeState::Closed;
        outcome
    }
}
