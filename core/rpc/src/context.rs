// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::router::{Address, RouteMatch};

/// Request scoped values handed to a method implementation.
#[derive(Debug, Clone)]
pub struct CallContext {
    subject: String,
    reply: Option<String>,
    route: RouteMatch,
    method_params: HashMap<String, String>,
    cancel: CancellationToken,
}

impl CallContext {
    pub(crate) fn new(
        subject: impl Into<String>,
        reply: Option<String>,
        route: RouteMatch,
        param_names: &[String],
        cancel: CancellationToken,
    ) -> Self {
        let method_params = param_names
            .iter()
            .cloned()
            .zip(route.method_params().iter().cloned())
            .collect();

        CallContext {
            subject: subject.into(),
            reply,
            route,
            method_params,
            cancel,
        }
    }

    /// Concrete subject the request arrived on
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn reply_subject(&self) -> Option<&str> {
        self.reply.as_deref()
    }

    pub fn method(&self) -> &str {
        self.route.method()
    }

    pub fn package_instance(&self) -> Option<&str> {
        self.route.package_instance()
    }

    /// Address the call was made to, e.g. to publish notifications back to it.
    pub fn address(&self) -> Address {
        self.route.address()
    }

    pub fn service_param(&self, name: &str) -> Option<&str> {
        self.route
            .service_params()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn method_param(&self, name: &str) -> Option<&str> {
        self.method_params.get(name).map(String::as_str)
    }

    /// Method subject parameters in declaration order.
    pub fn method_params(&self) -> &[String] {
        self.route.method_params()
    }

    /// Cancelled once the dispatch of this call completes or the server shuts down.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve when the call is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ServiceRoute;

    #[test]
    fn test_named_params() {
        let route = ServiceRoute::builder("root.*.svcsubjectparams.*")
            .package_instance()
            .service_param("clientid")
            .build()
            .unwrap();
        let subject = "root.default.svcsubjectparams.me.MtWithSubjectParams.p1.p2";
        let parsed = route.parse(subject).unwrap();

        let token = CancellationToken::new();
        let ctx = CallContext::new(
            subject,
            None,
            parsed,
            &["mp1".to_string(), "mp2".to_string()],
            token.clone(),
        );

        assert_eq!(ctx.package_instance(), Some("default"));
        assert_eq!(ctx.service_param("clientid"), Some("me"));
        assert_eq!(
            ctx.address(),
            Address::instance("default").with_service_param("me")
        );
        assert_eq!(ctx.service_param("other"), None);
        assert_eq!(ctx.method(), "MtWithSubjectParams");
        assert_eq!(ctx.method_param("mp1"), Some("p1"));
        assert_eq!(ctx.method_param("mp2"), Some("p2"));
        assert_eq!(ctx.method_params().len(), 2);
        assert!(ctx.reply_subject().is_none());

        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
