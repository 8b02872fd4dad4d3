//! Procedural macros for armature-rest-client.

use proc_macro::TokenStream;

mod attrs;
mod client;

/// Generates a REST client from an annotated trait.
///
/// The trait is kept (made `async_trait`), and a `<Trait>Client` struct is
/// generated that implements it through an `armature_rest_client::Proxy`.
/// The client also implements `RestService` so it can be created from a
/// `RestClients` factory.
///
/// ```rust,ignore
/// #[rest_client("users")]
/// pub trait UserApi {
///     #[get("users/{id}")]
///     async fn get_user(&self, #[path] id: u64, #[query] expand: Option<String>) -> Result<User>;
///
///     #[post("users")]
///     #[headers("Accept: application/json")]
///     async fn create(&self, #[body] user: &NewUser) -> Result<User>;
///
///     #[delete("users/{id}")]
///     #[service_account("admin", scopes = ["users:write"])]
///     async fn delete(&self, #[path] id: u64, #[header("X-Reason")] reason: &str) -> Result<()>;
///
///     #[get("users/{id}/name")]
///     #[response(text)]
///     #[timeout(ms = 500)]
///     async fn name(&self, #[path("id")] user: u64) -> Result<String>;
/// }
/// ```
///
/// Method attributes: `get`, `post`, `put`, `patch`, `delete`, `head`,
/// `options`, `headers`, `service_account`, `response(json | text)` and
/// `timeout(ms = N | secs = N)`.
///
/// Argument attributes: `path`, `path("name")`, `path(encoded)`, `query`,
/// `query("name")`, `header("Name")`, `body` and `body(json | form | text)`.
///
/// Methods returning `Result<()>` discard the response body; methods
/// returning `Result<Response>` get the raw response.
#[proc_macro_attribute]
pub fn rest_client(attr: TokenStream, item: TokenStream) -> TokenStream {
    client::expand(attr.into(), item.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
