//! Commands an entity offers, keyed by node.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::discovery::Advertiser;
use crate::handler::{CommandHandler, HandlerKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDescriptor {
    pub node: String,
    pub name: String,
}

impl CommandDescriptor {
    pub fn new(node: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            name: name.into(),
        }
    }
}

/// Produces a fresh command instance for every invocation.
pub trait CommandFactory: Send + Sync {
    fn create(&self, descriptor: &CommandDescriptor) -> HandlerKind;
}

impl<F> CommandFactory for F
where
    F: Fn(&CommandDescriptor) -> HandlerKind + Send + Sync,
{
    fn create(&self, descriptor: &CommandDescriptor) -> HandlerKind {
        self(descriptor)
    }
}

#[derive(Clone)]
pub struct RegisteredCommand {
    descriptor: CommandDescriptor,
    factory: Arc<dyn CommandFactory>,
}

impl RegisteredCommand {
    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    pub fn instantiate(&self) -> CommandHandler {
        let kind = self.factory.create(&self.descriptor);
        CommandHandler::new(self.descriptor.clone(), kind)
    }
}

/// Node to factory mapping owned by whoever hosts the commands.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    commands: DashMap<String, RegisteredCommand>,
    advertiser: Option<Arc<dyn Advertiser>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that reports every (un)registration to `advertiser`.
    pub fn with_advertiser(advertiser: Arc<dyn Advertiser>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                commands: DashMap::new(),
                advertiser: Some(advertiser),
            }),
        }
    }

    /// Registers `node`, replacing any earlier registration. Sessions already
    /// running under the old registration keep their own instance. Returns
    /// the replaced descriptor.
    pub fn register<F>(
        &self,
        node: impl Into<String>,
        name: impl Into<String>,
        factory: F,
    ) -> Option<CommandDescriptor>
    where
        F: Fn(&CommandDescriptor) -> HandlerKind + Send + Sync + 'static,
    {
        self.register_factory(CommandDescriptor::new(node, name), Arc::new(factory))
    }

    pub fn register_factory(
        &self,
        descriptor: CommandDescriptor,
        factory: Arc<dyn CommandFactory>,
    ) -> Option<CommandDescriptor> {
        let node = descriptor.node.clone();
        let entry = RegisteredCommand {
            descriptor: descriptor.clone(),
            factory,
        };
        let replaced = self
            .inner
            .commands
            .insert(node.clone(), entry)
            .map(|previous| previous.descriptor);

        match &replaced {
            Some(previous) => warn!(
                node = %node,
                previous_name = %previous.name,
                name = %descriptor.name,
                "command node re-registered; replacing previous factory"
            ),
            None => info!(node = %node, name = %descriptor.name, "command registered"),
        }

        if let Some(advertiser) = &self.inner.advertiser {
            advertiser.advertise(&descriptor);
        }
        replaced
    }

    pub fn lookup(&self, node: &str) -> Option<RegisteredCommand> {
        self.inner
            .commands
            .get(node)
            .map(|entry| entry.value().clone())
    }

    pub fn unregister(&self, node: &str) -> bool {
        let removed = self.inner.commands.remove(node).is_some();
        if removed {
            info!(node, "command unregistered");
            if let Some(advertiser) = &self.inner.advertiser {
                advertiser.withdraw(node);
            }
        }
        removed
    }

    /// Registered commands ordered by node.
    pub fn descriptors(&self) -> Vec<CommandDescriptor> {
        let mut descriptors: Vec<_> = self
            .inner
            .commands
            .iter()
            .map(|entry| entry.value().descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.node.cmp(&b.node));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.inner.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.commands.is_empty()
    }
}
