//! Call arguments.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Conversion of an argument into wire strings.
///
/// `None` and empty collections produce no values; collections produce one
/// value per element.
pub trait ParamValue {
    /// Wire representations of this value.
    fn param_values(&self) -> Vec<String>;
}

macro_rules! display_param_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ParamValue for $ty {
                fn param_values(&self) -> Vec<String> {
                    vec![self.to_string()]
                }
            }
        )*
    };
}

display_param_value!(
    str, String, char, bool, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize,
    f32, f64,
);

impl<T: ParamValue + ?Sized> ParamValue for &T {
    fn param_values(&self) -> Vec<String> {
        (**self).param_values()
    }
}

impl<T: ParamValue> ParamValue for Option<T> {
    fn param_values(&self) -> Vec<String> {
        self.as_ref().map(ParamValue::param_values).unwrap_or_default()
    }
}

impl<T: ParamValue> ParamValue for [T] {
    fn param_values(&self) -> Vec<String> {
        self.iter().flat_map(ParamValue::param_values).collect()
    }
}

impl<T: ParamValue> ParamValue for Vec<T> {
    fn param_values(&self) -> Vec<String> {
        self.as_slice().param_values()
    }
}

/// Arguments of a single proxy call, keyed by binding name.
///
/// Emission order is taken from the endpoint descriptor, never from the order
/// arguments were added, so equal invocations build equal requests.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub(crate) path: HashMap<String, Vec<String>>,
    pub(crate) query: HashMap<String, Vec<String>>,
    pub(crate) headers: HashMap<String, Vec<String>>,
    pub(crate) body: Option<std::result::Result<serde_json::Value, String>>,
    pub(crate) timeout: Option<Duration>,
}

impl Invocation {
    /// Create an empty invocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a path placeholder value.
    pub fn path<V: ParamValue + ?Sized>(mut self, name: &str, value: &V) -> Self {
        self.path.insert(name.to_string(), value.param_values());
        self
    }

    /// Set a query parameter value.
    pub fn query<V: ParamValue + ?Sized>(mut self, name: &str, value: &V) -> Self {
        self.query.insert(name.to_string(), value.param_values());
        self
    }

    /// Set a header parameter value.
    pub fn header<V: ParamValue + ?Sized>(mut self, name: &str, value: &V) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.param_values());
        self
    }

    /// Set the request body.
    ///
    /// Serialization failures are reported when the call is made.
    pub fn body<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.body = Some(serde_json::to_value(value).map_err(|e| e.to_string()));
        self
    }

    /// Set a deadline for this call, overriding the endpoint and client.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deadline set on this invocation.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
