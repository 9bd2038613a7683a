use super::webhook::{self, WebhookParser};
use super::{GatewayAdapterBox, payu::PayUAdapter, wompi::WompiAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Builds a fresh, uninitialized adapter.
pub type AdapterConstructor = Arc<dyn Fn() -> GatewayAdapterBox + Send + Sync>;

#[derive(Clone)]
struct Registration {
    constructor: AdapterConstructor,
    parser: WebhookParser,
}

/// Maps a provider name to an adapter constructor and its webhook parser.
///
/// Lookups are case-insensitive. Every call to [`create_adapter`] returns a
/// new instance, so initialization never leaks between gateways.
///
/// [`create_adapter`]: GatewayAdapterFactory::create_adapter
#[derive(Clone, Default)]
pub struct GatewayAdapterFactory {
    registry: HashMap<String, Registration>,
}

impl GatewayAdapterFactory {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in providers: `payu` and `wompi`.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(
            "payu",
            Arc::new(|| Box::new(PayUAdapter::new()) as GatewayAdapterBox),
            webhook::payu,
        );
        factory.register(
            "wompi",
            Arc::new(|| Box::new(WompiAdapter::new()) as GatewayAdapterBox),
            webhook::wompi,
        );
        factory
    }

    /// Adds or replaces a provider.
    pub fn register(&mut self, name: &str, constructor: AdapterConstructor, parser: WebhookParser) {
        self.registry.insert(
            name.to_ascii_lowercase(),
            Registration {
                constructor,
                parser,
            },
        );
    }

    /// Returns `None` (and logs) for providers nobody registered.
    pub fn create_adapter(&self, name: &str) -> Option<GatewayAdapterBox> {
        match self.registry.get(&name.to_ascii_lowercase()) {
            Some(registration) => Some((registration.constructor)()),
            None => {
                error!(gateway = %name, "Unsupported payment gateway");
                None
            }
        }
    }

    pub fn webhook_parser(&self, name: &str) -> Option<WebhookParser> {
        self.registry
            .get(&name.to_ascii_lowercase())
            .map(|registration| registration.parser)
    }

    pub fn supports(&self, name: &str) -> bool {
        self.registry.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.keys().cloned().collect();
        names.sort();
        names
    }
}
