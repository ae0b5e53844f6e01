//! Run code paths behind a flag.
//!
//! ```
//! # use feature_flags::{Client, ClientConfig, EvaluationContext};
//! # let client = Client::new(ClientConfig::default());
//! let context = EvaluationContext::new("user-42");
//! let page = client.when_enabled(
//!     "new-ui",
//!     &context,
//!     false,
//!     || "new page",
//!     || "old page",
//! );
//! assert_eq!(page, "old page");
//! ```
use std::future::Future;

use crate::{Client, EvaluationContext};

impl Client {
    /// Call `on` if `flag_key` is enabled for `context`, `off` otherwise.
    pub fn when_enabled<T>(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default: bool,
        on: impl FnOnce() -> T,
        off: impl FnOnce() -> T,
    ) -> T {
        if self.is_enabled(flag_key, context, default) {
            on()
        } else {
            off()
        }
    }

    /// Call `f` with the variant `context` is assigned to.
    pub fn with_variant<T>(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_variant: &str,
        f: impl FnOnce(&str) -> T,
    ) -> T {
        let (variant, _reason) = self.get_variant(flag_key, context, default_variant);
        f(&variant)
    }

    /// Async version of [`Client::when_enabled`]. Only the selected branch is awaited.
    pub async fn when_enabled_async<T, On, Off>(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default: bool,
        on: impl FnOnce() -> On,
        off: impl FnOnce() -> Off,
    ) -> T
    where
        On: Future<Output = T>,
        Off: Future<Output = T>,
    {
        if self.is_enabled_async(flag_key, context, default).await {
            on().await
        } else {
            off().await
        }
    }

    /// Async version of [`Client::with_variant`].
    pub async fn with_variant_async<T, Fut>(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_variant: &str,
        f: impl FnOnce(String) -> Fut,
    ) -> T
    where
        Fut: Future<Output = T>,
    {
        let (variant, _reason) = self
            .get_variant_async(flag_key, context, default_variant)
            .await;
        f(variant).await
    }
}
