/// Declared order in which upload hosts are tried.
///
/// The policy is a value, not a code path: providers in priority order plus
/// an optional placeholder URL used only when every provider failed. Runs
/// that fall back to the placeholder are reported as degraded.
#[derive(Debug, Clone)]
pub struct FallbackPolicy<T: NamedProvider> {
    providers: Vec<T>,
    placeholder_url: Option<String>,
}

pub trait NamedProvider {
    fn name(&self) -> &str;

    /// Lower values are tried first.
    fn priority(&self) -> i64 {
        0
    }
}

impl<T: NamedProvider> FallbackPolicy<T> {
    /// Sorts by priority; providers with equal priority keep their input order.
    pub fn new(mut providers: Vec<T>, placeholder_url: Option<String>) -> Self {
        providers.sort_by_key(|provider| provider.priority());
        Self {
            providers,
            placeholder_url: placeholder_url
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    pub fn placeholder_url(&self) -> Option<&str> {
        self.placeholder_url.as_deref()
    }
}
