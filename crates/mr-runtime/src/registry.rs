use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Local;
use mr_core::MacroValue;
use parking_lot::RwLock;

use crate::collaborators::ContextPropertyProvider;

pub type NameHandler = Arc<dyn Fn(&MacroValue, &str) -> Option<MacroValue> + Send + Sync>;
pub type IndexHandler = Arc<dyn Fn(&MacroValue, i64) -> Option<MacroValue> + Send + Sync>;
pub type FieldProducer = Arc<dyn Fn(&MacroValue) -> MacroValue + Send + Sync>;
pub type ValueHook = Arc<dyn Fn(&str) -> Option<MacroValue> + Send + Sync>;
pub type RootProperty = Arc<dyn Fn() -> MacroValue + Send + Sync>;

type ProviderEntry = (String, Arc<dyn ContextPropertyProvider>);

/// Extension points shared by every resolver that uses this registry.
///
/// Registration swaps in a fresh copy of the affected list under the write
/// lock; readers clone the current `Arc` and iterate without holding it.
pub struct ValueRegistry {
    name_handlers: RwLock<Arc<Vec<NameHandler>>>,
    index_handlers: RwLock<Arc<Vec<IndexHandler>>>,
    fields: RwLock<Arc<BTreeMap<(String, String), FieldProducer>>>,
    on_get_value: RwLock<Option<ValueHook>>,
    root_properties: RwLock<Arc<BTreeMap<String, RootProperty>>>,
    context_providers: RwLock<Arc<Vec<ProviderEntry>>>,
    context_macros_enabled: AtomicBool,
}

impl ValueRegistry {
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_root_property("CurrentDateTime", || {
            MacroValue::DateTime(Local::now().naive_local())
        });
        registry.register_root_property("Today", || {
            Local::now()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(MacroValue::DateTime)
                .unwrap_or_default()
        });
        registry.register_root_property("NewLine", || MacroValue::text("\n"));
        registry.register_root_property("null", || MacroValue::Null);
        registry.register_root_property("Version", || MacroValue::text(env!("CARGO_PKG_VERSION")));
        registry
    }

    pub fn empty() -> Self {
        Self {
            name_handlers: RwLock::new(Arc::new(Vec::new())),
            index_handlers: RwLock::new(Arc::new(Vec::new())),
            fields: RwLock::new(Arc::new(BTreeMap::new())),
            on_get_value: RwLock::new(None),
            root_properties: RwLock::new(Arc::new(BTreeMap::new())),
            context_providers: RwLock::new(Arc::new(Vec::new())),
            context_macros_enabled: AtomicBool::new(true),
        }
    }

    pub fn global() -> Arc<ValueRegistry> {
        static GLOBAL: OnceLock<Arc<ValueRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ValueRegistry::new())))
    }

    pub fn register_name_handler(
        &self,
        handler: impl Fn(&MacroValue, &str) -> Option<MacroValue> + Send + Sync + 'static,
    ) {
        let mut guard = self.name_handlers.write();
        let mut next = Vec::clone(&guard);
        next.push(Arc::new(handler));
        *guard = Arc::new(next);
    }

    pub fn register_index_handler(
        &self,
        handler: impl Fn(&MacroValue, i64) -> Option<MacroValue> + Send + Sync + 'static,
    ) {
        let mut guard = self.index_handlers.write();
        let mut next = Vec::clone(&guard);
        next.push(Arc::new(handler));
        *guard = Arc::new(next);
    }

    /// Registers a computed member for containers whose type name is `type_name`.
    pub fn register_field(
        &self,
        type_name: &str,
        member: &str,
        producer: impl Fn(&MacroValue) -> MacroValue + Send + Sync + 'static,
    ) {
        let mut guard = self.fields.write();
        let mut next = BTreeMap::clone(&guard);
        next.insert(
            (type_name.to_lowercase(), member.to_lowercase()),
            Arc::new(producer),
        );
        *guard = Arc::new(next);
    }

    pub fn set_on_get_value(&self, hook: Option<ValueHook>) {
        *self.on_get_value.write() = hook;
    }

    pub fn register_root_property(
        &self,
        name: &str,
        property: impl Fn() -> MacroValue + Send + Sync + 'static,
    ) {
        let mut guard = self.root_properties.write();
        let mut next = BTreeMap::clone(&guard);
        next.insert(name.to_lowercase(), Arc::new(property));
        *guard = Arc::new(next);
    }

    pub fn register_context_provider(
        &self,
        namespace: &str,
        provider: Arc<dyn ContextPropertyProvider>,
    ) {
        let mut guard = self.context_providers.write();
        let mut next = Vec::clone(&guard);
        next.push((namespace.to_string(), provider));
        *guard = Arc::new(next);
    }

    pub fn set_context_macros_enabled(&self, enabled: bool) {
        self.context_macros_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn context_macros_enabled(&self) -> bool {
        self.context_macros_enabled.load(Ordering::SeqCst)
    }

    pub fn root_property_names(&self) -> Vec<String> {
        self.root_properties.read().keys().cloned().collect()
    }

    pub(crate) fn try_name_handlers(&self, container: &MacroValue, name: &str) -> Option<MacroValue> {
        let handlers = Arc::clone(&self.name_handlers.read());
        handlers.iter().find_map(|handler| handler(container, name))
    }

    pub(crate) fn try_index_handlers(&self, container: &MacroValue, index: i64) -> Option<MacroValue> {
        let handlers = Arc::clone(&self.index_handlers.read());
        handlers.iter().find_map(|handler| handler(container, index))
    }

    pub(crate) fn field(&self, type_name: &str, member: &str) -> Option<FieldProducer> {
        let fields = Arc::clone(&self.fields.read());
        fields
            .get(&(type_name.to_lowercase(), member.to_lowercase()))
            .cloned()
    }

    pub(crate) fn on_get_value(&self, name: &str) -> Option<MacroValue> {
        let hook = self.on_get_value.read().clone()?;
        hook(name).filter(|value| !value.is_null())
    }

    pub(crate) fn root_property(&self, name: &str) -> Option<MacroValue> {
        let properties = Arc::clone(&self.root_properties.read());
        properties.get(name).map(|property| property())
    }

    pub(crate) fn ambient_property(&self, name: &str) -> Option<MacroValue> {
        if !self.context_macros_enabled() {
            return None;
        }
        let providers = Arc::clone(&self.context_providers.read());
        providers
            .iter()
            .find_map(|(namespace, provider)| provider.get_ambient_property(namespace, name))
    }
}

impl Default for ValueRegistry {
    fn default() -> Self {
        Self::new()
    }
}
