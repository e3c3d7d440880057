//! Uniform operations over single services and nested groups.
use std::sync::Arc;

use crate::config::ServiceDefinition;
use crate::error::TenderError;
use crate::service::{BuildOutcome, LaunchOutcome, OperationConfig, ServiceManager, ServiceOutcome};
use crate::status::{ServiceStatus, StatusSweep};
use crate::termination::StopOutcome;

/// A named, ordered collection of services and groups. Holds no process state.
#[derive(Debug, Clone)]
pub struct ServiceGroup {
    name: String,
    children: Vec<ServiceOrGroup>,
}

impl ServiceGroup {
    /// Group `name` over `children`, in the order given.
    pub fn new(name: impl Into<String>, children: Vec<ServiceOrGroup>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

/// Either a single service or a group of them.
#[derive(Debug, Clone)]
pub enum ServiceOrGroup {
    /// A leaf service.
    Service(Arc<ServiceDefinition>),
    /// An ordered group.
    Group(ServiceGroup),
}

impl ServiceOrGroup {
    /// Service or group name.
    pub fn name(&self) -> &str {
        match self {
            ServiceOrGroup::Service(service) => &service.name,
            ServiceOrGroup::Group(group) => &group.name,
        }
    }

    /// Every leaf service, depth-first in declared order.
    pub fn services(&self) -> Vec<Arc<ServiceDefinition>> {
        let mut services = Vec::new();
        self.collect_services(&mut services);
        services
    }

    fn collect_services(&self, out: &mut Vec<Arc<ServiceDefinition>>) {
        match self {
            ServiceOrGroup::Service(service) => out.push(Arc::clone(service)),
            ServiceOrGroup::Group(group) => {
                for child in &group.children {
                    child.collect_services(out);
                }
            }
        }
    }

    /// Names of the services taking part in `op` that must run as root.
    pub fn sudo_services(&self, op: &OperationConfig) -> Vec<String> {
        self.services()
            .into_iter()
            .filter(|service| service.requires_sudo && !op.is_excluded(service))
            .map(|service| service.name.clone())
            .collect()
    }

    /// Builds every leaf in order.
    pub fn build(
        &self,
        manager: &ServiceManager,
        op: &OperationConfig,
    ) -> Vec<ServiceOutcome<BuildOutcome>> {
        self.each(false, &mut |service: &ServiceDefinition| {
            manager.controller(service).build(op)
        })
    }

    /// Starts every leaf in order.
    pub fn start(
        &self,
        manager: &ServiceManager,
        op: &OperationConfig,
    ) -> Vec<ServiceOutcome<LaunchOutcome>> {
        self.each(false, &mut |service: &ServiceDefinition| {
            manager.controller(service).start(op)
        })
    }

    /// Stops every leaf, last declared first.
    pub fn stop(
        &self,
        manager: &ServiceManager,
        op: &OperationConfig,
    ) -> Vec<ServiceOutcome<StopOutcome>> {
        self.each(true, &mut |service: &ServiceDefinition| {
            manager.controller(service).stop(op)
        })
    }

    /// Restarts every leaf in order.
    pub fn restart(
        &self,
        manager: &ServiceManager,
        op: &OperationConfig,
    ) -> Vec<ServiceOutcome<LaunchOutcome>> {
        self.each(false, &mut |service: &ServiceDefinition| {
            manager.controller(service).restart(op)
        })
    }

    /// Status of every leaf in order.
    pub fn status(
        &self,
        manager: &ServiceManager,
        sweep: &StatusSweep,
    ) -> Vec<ServiceOutcome<ServiceStatus>> {
        self.each(false, &mut |service: &ServiceDefinition| {
            manager.controller(service).status(sweep)
        })
    }

    /// Applies `op` to each leaf sequentially. A failing leaf does not stop
    /// the rest.
    fn each<T>(
        &self,
        reverse: bool,
        op: &mut dyn FnMut(&ServiceDefinition) -> Result<T, TenderError>,
    ) -> Vec<ServiceOutcome<T>> {
        let mut services = self.services();
        if reverse {
            services.reverse();
        }
        services
            .iter()
            .map(|service| ServiceOutcome::new(service.name.clone(), op(service.as_ref())))
            .collect()
    }
}
