//! This module provides the `Filter` trait and related structures for managing filters and their configuration.
//! Filters are applied to the working set (`FilterData`) of a deconvolution run and customized through
//! the `DeconvolutionSettings`. It also implements a global, thread-safe registry of all available filters.

use crate::config::DeconvolutionSettings;
use crate::data_container::FilterData;
use crate::error::{DeconvolutionError, Result};
use crate::filters::{
    band_pass::FrequencyBandPass, baseline::BaselineRemoval, double_gaussian::DoubleGaussian,
    envelope::HilbertEnvelope, psf_deconvolution::PsfDeconvolution, sparse::SparseDeconvolution,
    time_window::TimeWindow, wiener::Wiener,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

/// Shared progress of a long-running filter: `None` when idle, otherwise a value in [0, 1].
pub type ProgressLock = Arc<RwLock<Option<f32>>>;

/// Writes a progress value if the lock is not poisoned.
pub fn set_progress(progress_lock: &ProgressLock, value: Option<f32>) {
    if let Ok(mut p) = progress_lock.write() {
        *p = value.map(|v| v.clamp(0.0, 1.0));
    }
}

/// The `Filter` trait defines the structure and behavior of a processing step.
///
/// Filters must implement:
/// - A `new` function to initialize a filter with default parameters.
/// - A `configure` function that copies the filter parameters from the settings.
/// - A `config` function to provide metadata for the filter.
/// - A `filter` function to apply the filter to a `FilterData`.
///
/// To add a filter, implement the trait for a struct deriving `Clone` and `Debug` and add it
/// to the registry in `FilterRegistry::with_builtin_filters`.
///
/// **Example**:
/// ```ignore
/// #[derive(Clone, Debug)]
/// struct Invert;
///
/// impl Filter for Invert {
///     fn new() -> Self { Invert }
///
///     fn configure(&mut self, _settings: &DeconvolutionSettings) {}
///
///     fn config(&self) -> FilterConfig {
///         FilterConfig {
///             name: "Invert".to_string(),
///             description: "Inverts the sign of the impulse response.".to_string(),
///             hyperlink: None,
///             domain: FilterDomain::TimeAfterFFT,
///         }
///     }
///
///     fn filter(
///         &mut self,
///         input_data: &FilterData,
///         _progress_lock: &ProgressLock,
///         _abort_flag: &Arc<AtomicBool>,
///     ) -> Result<FilterData> {
///         let mut output_data = input_data.clone();
///         output_data.impulse.mapv_inplace(|v| -v);
///         Ok(output_data)
///     }
/// }
/// ```
pub trait Filter: Send + Sync + Debug + CloneBoxedFilter {
    /// Creates a new instance of the filter with default parameters.
    fn new() -> Self
    where
        Self: Sized;

    /// Copies the parameters of this filter from the settings.
    fn configure(&mut self, settings: &DeconvolutionSettings);

    /// Returns the filter configuration, including name, description and domain.
    fn config(&self) -> FilterConfig;

    /// Applies the filter to the given `FilterData`.
    ///
    /// # Arguments
    ///
    /// - `input_data`: The working set to be processed.
    /// - `progress_lock`: Progress of the filter (only recommended for filters that take a long time to run).
    /// - `abort_flag`: Set to abort the calculation (only recommended for filters that take a long time to run).
    ///
    /// Long-running filters should iterate with the loops of the `cancellable_loops` crate and
    /// return `DeconvolutionError::Aborted` once the abort flag was observed.
    fn filter(
        &mut self,
        input_data: &FilterData,
        progress_lock: &ProgressLock,
        abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData>;
}

/// The `FilterDomain` enum specifies the domain and execution order of filters.
///
/// The variants are ordered by execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterDomain {
    /// Time-domain filters that should run first before FFT.
    TimeBeforeFFTPrioFirst,
    /// Standard time-domain filters that run before FFT.
    TimeBeforeFFT,
    /// Filters that operate on the spectra.
    Frequency,
    /// The deconvolution itself, exactly one per pipeline.
    Deconvolution,
    /// Standard time-domain filters that run on the impulse response.
    TimeAfterFFT,
    /// Filters that should run last, on the intensity image.
    TimeAfterFFTPrioLast,
}

/// A structure representing the configuration and metadata of a filter.
///
/// # Fields
/// - `name`: A human-readable name for the filter, also used as registry key.
/// - `description`: A detailed description of what the filter does.
/// - `hyperlink`: Optional DOI or reference link with label.
/// - `domain`: The working domain, represented as a `FilterDomain`.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub name: String,
    pub description: String,
    pub hyperlink: Option<(Option<String>, String)>, // (optional_label, url)
    pub domain: FilterDomain,
}

/// A trait to allow cloning of boxed filters.
/// This is necessary because `Box<dyn Filter>` cannot be cloned directly.
pub trait CloneBoxedFilter {
    fn clone_box(&self) -> Box<dyn Filter>;
}

impl<T> CloneBoxedFilter for T
where
    T: 'static + Filter + Clone,
{
    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Filter> {
    fn clone(&self) -> Box<dyn Filter> {
        self.as_ref().clone_box()
    }
}

/// A registry to manage and retrieve the available filters by name.
#[derive(Debug)]
pub struct FilterRegistry {
    pub filters: HashMap<String, Box<dyn Filter>>,
}

impl FilterRegistry {
    fn with_builtin_filters() -> FilterRegistry {
        let mut registry = FilterRegistry {
            filters: HashMap::new(),
        };
        registry.register_filter::<BaselineRemoval>();
        registry.register_filter::<TimeWindow>();
        registry.register_filter::<FrequencyBandPass>();
        registry.register_filter::<DoubleGaussian>();
        registry.register_filter::<Wiener>();
        registry.register_filter::<SparseDeconvolution>();
        registry.register_filter::<HilbertEnvelope>();
        registry.register_filter::<PsfDeconvolution>();
        registry
    }

    /// Registers a new filter of type `F` under the name of its configuration.
    pub fn register_filter<F: Filter + 'static>(&mut self) {
        let filter_instance = F::new();
        let name = filter_instance.config().name;
        if self
            .filters
            .insert(name.clone(), Box::new(filter_instance))
            .is_some()
        {
            log::warn!("filter \"{name}\" was registered twice");
        }
    }

    /// Retrieves a registered filter by its name.
    pub fn get_filter(&self, name: &str) -> Option<&Box<dyn Filter>> {
        self.filters.get(name)
    }

    /// Returns a fresh copy of the named filter.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Filter>> {
        self.get_filter(name)
            .cloned()
            .ok_or_else(|| DeconvolutionError::UnknownFilter(name.to_string()))
    }

    /// Configurations of all filters, sorted by domain and name.
    pub fn configs(&self) -> Vec<FilterConfig> {
        let mut configs: Vec<FilterConfig> = self.filters.values().map(|f| f.config()).collect();
        configs.sort_by(|a, b| a.domain.cmp(&b.domain).then_with(|| a.name.cmp(&b.name)));
        configs
    }

    /// Names of all filters, sorted by domain and name.
    pub fn names(&self) -> Vec<String> {
        self.configs().into_iter().map(|c| c.name).collect()
    }
}

/// A global, thread-safe filter registry.
///
/// **Usage Example**:
/// ```ignore
/// if let Ok(registry) = FILTER_REGISTRY.lock() {
///     let wiener = registry.instantiate("Wiener Deconvolution")?;
/// }
/// ```
pub static FILTER_REGISTRY: Lazy<Mutex<FilterRegistry>> =
    Lazy::new(|| Mutex::new(FilterRegistry::with_builtin_filters()));

/// Returns a copy of the named filter from the global registry.
pub fn instantiate_filter(name: &str) -> Result<Box<dyn Filter>> {
    FILTER_REGISTRY
        .lock()
        .map_err(|_| DeconvolutionError::config("filter registry lock is poisoned"))?
        .instantiate(name)
}

/// Configurations of all registered filters.
pub fn registered_filters() -> Vec<FilterConfig> {
    match FILTER_REGISTRY.lock() {
        Ok(registry) => registry.configs(),
        Err(_) => vec![],
    }
}
