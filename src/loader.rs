//! Loader boundary and the lifecycle of a loaded graph
//!
//! A `Manager` owns one graph and the handle its loader returned. The handle
//! is released on `stop` or, failing that, when the manager is dropped, so
//! every exit path gives the kernel resources back.

use crate::orchestrator::ProbeGraph;
use crate::{KitError, Result};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Turns a graph into kernel resources
pub trait Loader {
    type Handle: LoadHandle;

    fn load(&mut self, graph: &ProbeGraph) -> Result<Self::Handle>;
}

/// Kernel resources held for a loaded graph
pub trait LoadHandle {
    fn release(self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    #[default]
    Unconfigured,
    Built,
    Loaded,
    Unloaded,
}

impl LifecycleState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Built => "built",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Unloaded => "unloaded",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct Manager<H: LoadHandle> {
    state: LifecycleState,
    graph: Option<ProbeGraph>,
    handle: Option<H>,
}

impl<H: LoadHandle> Default for Manager<H> {
    fn default() -> Self {
        Self {
            state: LifecycleState::Unconfigured,
            graph: None,
            handle: None,
        }
    }
}

impl<H: LoadHandle> Manager<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager already holding a graph
    pub fn built(graph: ProbeGraph) -> Self {
        let mut manager = Self::new();
        manager.graph = Some(graph);
        manager.state = LifecycleState::Built;
        manager
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn graph(&self) -> Option<&ProbeGraph> {
        self.graph.as_ref()
    }

    fn expect_state(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        if self.state != from {
            return Err(KitError::InvalidTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        Ok(())
    }

    pub fn configure(&mut self, graph: ProbeGraph) -> Result<()> {
        self.expect_state(LifecycleState::Unconfigured, LifecycleState::Built)?;
        self.graph = Some(graph);
        self.state = LifecycleState::Built;
        Ok(())
    }

    /// Hand the graph to the loader. A load error leaves the manager built.
    pub fn start<L>(&mut self, loader: &mut L) -> Result<()>
    where
        L: Loader<Handle = H>,
    {
        self.expect_state(LifecycleState::Built, LifecycleState::Loaded)?;
        let graph = self.graph.as_ref().ok_or(KitError::InvalidTransition {
            from: LifecycleState::Unconfigured.as_str(),
            to: LifecycleState::Loaded.as_str(),
        })?;

        let handle = loader.load(graph)?;
        info!("{} graph loaded", graph.kind);
        self.handle = Some(handle);
        self.state = LifecycleState::Loaded;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.expect_state(LifecycleState::Loaded, LifecycleState::Unloaded)?;
        self.state = LifecycleState::Unloaded;
        if let Some(handle) = self.handle.take() {
            handle.release()?;
        }
        if let Some(graph) = &self.graph {
            info!("{} graph unloaded", graph.kind);
        }
        Ok(())
    }
}

impl<H: LoadHandle> Drop for Manager<H> {
    fn drop(&mut self) {
        if self.state == LifecycleState::Loaded {
            if let Err(e) = self.stop() {
                warn!("Failed to release probes on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KitOptions;
    use crate::env::HostEnvironment;
    use crate::orchestrator::{build_bootstrap, BuildInputs};
    use std::cell::Cell;
    use std::rc::Rc;

    struct MockHandle {
        released: Rc<Cell<u32>>,
    }

    impl LoadHandle for MockHandle {
        fn release(self) -> Result<()> {
            self.released.set(self.released.get() + 1);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockLoader {
        released: Rc<Cell<u32>>,
        loads: u32,
        fail: bool,
    }

    impl Loader for MockLoader {
        type Handle = MockHandle;

        fn load(&mut self, graph: &ProbeGraph) -> Result<MockHandle> {
            if self.fail {
                return Err(KitError::ProgramLoadFailed(format!(
                    "verifier rejected {}",
                    graph.kind
                )));
            }
            self.loads += 1;
            Ok(MockHandle {
                released: self.released.clone(),
            })
        }
    }

    fn graph() -> ProbeGraph {
        let inputs = BuildInputs {
            options: KitOptions::default(),
            host: HostEnvironment {
                interfaces: Vec::new(),
                docker_present: false,
                postgres_present: false,
                webapp_present: false,
            },
            pid: 1,
            exe_hash: 1,
        };
        build_bootstrap(&inputs).unwrap()
    }

    #[test]
    fn test_full_lifecycle() {
        let mut loader = MockLoader::default();
        let mut manager = Manager::new();
        assert_eq!(manager.state(), LifecycleState::Unconfigured);

        manager.configure(graph()).unwrap();
        assert_eq!(manager.state(), LifecycleState::Built);

        manager.start(&mut loader).unwrap();
        assert_eq!(manager.state(), LifecycleState::Loaded);
        assert_eq!(loader.loads, 1);

        manager.stop().unwrap();
        assert_eq!(manager.state(), LifecycleState::Unloaded);
        assert_eq!(loader.released.get(), 1);
    }

    #[test]
    fn test_start_requires_graph() {
        let mut loader = MockLoader::default();
        let mut manager: Manager<MockHandle> = Manager::new();
        let err = manager.start(&mut loader).unwrap_err();
        assert!(matches!(
            err,
            KitError::InvalidTransition {
                from: "unconfigured",
                to: "loaded"
            }
        ));
    }

    #[test]
    fn test_double_start_rejected() {
        let mut loader = MockLoader::default();
        let mut manager = Manager::built(graph());
        manager.start(&mut loader).unwrap();
        assert!(manager.start(&mut loader).is_err());
        assert_eq!(loader.loads, 1);
    }

    #[test]
    fn test_stop_before_start_rejected() {
        let mut manager: Manager<MockHandle> = Manager::built(graph());
        assert!(manager.stop().is_err());
        assert_eq!(manager.state(), LifecycleState::Built);
    }

    #[test]
    fn test_load_failure_keeps_built() {
        let mut loader = MockLoader {
            fail: true,
            ..MockLoader::default()
        };
        let mut manager = Manager::built(graph());
        let err = manager.start(&mut loader).unwrap_err();
        assert!(matches!(err, KitError::ProgramLoadFailed(_)));
        assert_eq!(manager.state(), LifecycleState::Built);
    }

    #[test]
    fn test_drop_releases_handle() {
        let mut loader = MockLoader::default();
        {
            let mut manager = Manager::built(graph());
            manager.start(&mut loader).unwrap();
        }
        assert_eq!(loader.released.get(), 1);
    }

    #[test]
    fn test_drop_after_stop_releases_once() {
        let mut loader = MockLoader::default();
        {
            let mut manager = Manager::built(graph());
            manager.start(&mut loader).unwrap();
            manager.stop().unwrap();
        }
        assert_eq!(loader.released.get(), 1);
    }
}
