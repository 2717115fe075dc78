// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Subject construction and parsing.
//!
//! A [`ServiceRoute`] describes how a service is addressed on the bus: a
//! template whose `*` segments are bound, in order, to the package instance
//! (when the route has one) and to the service parameters. Method subjects
//! extend the template with the method name followed by the method subject
//! parameters, so one handler subscribes to `<template>.>` and dispatches on
//! the captured suffix.

use std::fmt::{Display, Formatter};

use busrpc_bus::subject::{self, SEPARATOR, Token, WILDCARD_TAIL};
use thiserror::Error;

/// Empty method parameter list.
pub const NO_PARAMS: &[&str] = &[];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid subject template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },
    #[error("invalid subject token: {0}")]
    InvalidToken(String),
    #[error("expected {expected} subject parameters, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("subject '{subject}' does not have the segment count of '{pattern}'")]
    SegmentCount { subject: String, pattern: String },
    #[error("subject '{subject}' does not match '{pattern}' at segment {position}")]
    LiteralMismatch {
        subject: String,
        pattern: String,
        position: usize,
    },
    #[error("pattern '{0}' requires trailing segments")]
    MissingTail(String),
    #[error("pattern '{0}' does not accept trailing segments")]
    UnexpectedTail(String),
    #[error("address does not fit the route: {0}")]
    AddressMismatch(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("method registered twice: {0}")]
    DuplicateMethod(String),
}

/// Values bound by a pattern on a received subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    /// One value per `*`, in pattern order
    pub params: Vec<String>,
    /// Segments matched by a trailing `>`
    pub tail: Vec<String>,
}

/// A subject pattern able to render and capture its wildcard segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    pub fn parse(template: &str) -> Result<Self, RouteError> {
        let tokens = subject::tokenize(template).map_err(|e| RouteError::InvalidTemplate {
            template: template.to_string(),
            reason: e.to_string(),
        })?;

        Ok(SubjectPattern {
            raw: template.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Number of single segment wildcards.
    pub fn wildcards(&self) -> usize {
        self.tokens.iter().filter(|t| **t == Token::Single).count()
    }

    pub fn has_tail(&self) -> bool {
        matches!(self.tokens.last(), Some(Token::Tail))
    }

    /// Substitute `params` into the `*` segments and append `tail` in place of `>`.
    pub fn render<P, T>(&self, params: &[P], tail: &[T]) -> Result<String, RouteError>
    where
        P: AsRef<str>,
        T: AsRef<str>,
    {
        if params.len() != self.wildcards() {
            return Err(RouteError::ArityMismatch {
                expected: self.wildcards(),
                got: params.len(),
            });
        }
        if self.has_tail() && tail.is_empty() {
            return Err(RouteError::MissingTail(self.raw.clone()));
        }
        if !self.has_tail() && !tail.is_empty() {
            return Err(RouteError::UnexpectedTail(self.raw.clone()));
        }

        let mut params = params.iter();
        let mut segments: Vec<&str> = Vec::with_capacity(self.tokens.len() + tail.len());
        for token in &self.tokens {
            match token {
                Token::Literal(lit) => segments.push(lit),
                Token::Single => {
                    // length checked above
                    let Some(value) = params.next() else {
                        return Err(RouteError::ArityMismatch {
                            expected: self.wildcards(),
                            got: 0,
                        });
                    };
                    subject::validate_token(value.as_ref()).map_err(RouteError::InvalidToken)?;
                    segments.push(value.as_ref());
                }
                Token::Tail => {
                    for value in tail {
                        subject::validate_token(value.as_ref())
                            .map_err(RouteError::InvalidToken)?;
                        segments.push(value.as_ref());
                    }
                }
            }
        }

        let separator = SEPARATOR.to_string();
        Ok(segments.join(separator.as_str()))
    }

    /// Walk the received subject token by token and collect the wildcard values.
    pub fn capture(&self, subject: &str) -> Result<Captures, RouteError> {
        let parts: Vec<&str> = subject.split(SEPARATOR).collect();
        for part in &parts {
            subject::validate_token(part).map_err(RouteError::InvalidToken)?;
        }

        let segment_count = || RouteError::SegmentCount {
            subject: subject.to_string(),
            pattern: self.raw.clone(),
        };

        let mut captures = Captures {
            params: Vec::with_capacity(self.wildcards()),
            tail: Vec::new(),
        };

        let mut idx = 0;
        for token in &self.tokens {
            if idx >= parts.len() {
                return Err(segment_count());
            }
            match token {
                Token::Tail => {
                    captures.tail = parts[idx..].iter().map(|s| s.to_string()).collect();
                    return Ok(captures);
                }
                Token::Single => captures.params.push(parts[idx].to_string()),
                Token::Literal(lit) => {
                    if parts[idx] != lit.as_str() {
                        return Err(RouteError::LiteralMismatch {
                            subject: subject.to_string(),
                            pattern: self.raw.clone(),
                            position: idx,
                        });
                    }
                }
            }
            idx += 1;
        }

        if idx != parts.len() {
            return Err(segment_count());
        }

        Ok(captures)
    }
}

impl Display for SubjectPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Addressing values supplied by a client or notifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    package_instance: Option<String>,
    service_params: Vec<String>,
}

impl Address {
    pub fn new() -> Self {
        Address::default()
    }

    /// Address of a route whose only parameter is the package instance.
    pub fn instance(package_instance: impl Into<String>) -> Self {
        Address::new().with_package_instance(package_instance)
    }

    pub fn with_package_instance(mut self, package_instance: impl Into<String>) -> Self {
        self.package_instance = Some(package_instance.into());
        self
    }

    pub fn with_service_param(mut self, value: impl Into<String>) -> Self {
        self.service_params.push(value.into());
        self
    }

    pub fn package_instance(&self) -> Option<&str> {
        self.package_instance.as_deref()
    }

    pub fn service_params(&self) -> &[String] {
        &self.service_params
    }
}

/// Result of parsing an inbound method subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    package_instance: Option<String>,
    service_params: Vec<(String, String)>,
    method: String,
    method_params: Vec<String>,
}

impl RouteMatch {
    pub fn package_instance(&self) -> Option<&str> {
        self.package_instance.as_deref()
    }

    /// Service parameters as (name, value) pairs in declaration order.
    pub fn service_params(&self) -> &[(String, String)] {
        &self.service_params
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn method_params(&self) -> &[String] {
        &self.method_params
    }

    /// The client address that produced this subject.
    pub fn address(&self) -> Address {
        Address {
            package_instance: self.package_instance.clone(),
            service_params: self.service_params.iter().map(|(_, v)| v.clone()).collect(),
        }
    }
}

/// Static addressing description of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoute {
    pattern: SubjectPattern,
    package_instance: bool,
    service_params: Vec<String>,
}

impl ServiceRoute {
    /// Start describing a route from a template such as `root.*.custom_subject`.
    pub fn builder(template: impl Into<String>) -> ServiceRouteBuilder {
        ServiceRouteBuilder {
            template: template.into(),
            package_instance: false,
            service_params: Vec::new(),
        }
    }

    /// Pattern a handler for this service subscribes with.
    pub fn handler_pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn has_package_instance(&self) -> bool {
        self.package_instance
    }

    pub fn service_param_names(&self) -> &[String] {
        &self.service_params
    }

    /// Check that `address` supplies exactly the parameters this route binds.
    pub fn check_address(&self, address: &Address) -> Result<(), RouteError> {
        match (self.package_instance, address.package_instance.is_some()) {
            (true, false) => {
                return Err(RouteError::AddressMismatch(format!(
                    "route '{}' requires a package instance",
                    self.pattern
                )));
            }
            (false, true) => {
                return Err(RouteError::AddressMismatch(format!(
                    "route '{}' has no package instance",
                    self.pattern
                )));
            }
            _ => {}
        }

        if address.service_params.len() != self.service_params.len() {
            return Err(RouteError::ArityMismatch {
                expected: self.service_params.len(),
                got: address.service_params.len(),
            });
        }

        Ok(())
    }

    /// Build the concrete subject of `method` for `address`.
    pub fn subject<P: AsRef<str>>(
        &self,
        address: &Address,
        method: &str,
        method_params: &[P],
    ) -> Result<String, RouteError> {
        self.check_address(address)?;

        let params: Vec<&str> = address
            .package_instance
            .iter()
            .chain(address.service_params.iter())
            .map(String::as_str)
            .collect();

        let mut tail: Vec<&str> = Vec::with_capacity(method_params.len() + 1);
        tail.push(method);
        tail.extend(method_params.iter().map(|p| p.as_ref()));

        self.pattern.render(&params, &tail)
    }

    /// Split an inbound subject into instance, service parameters, method and method parameters.
    pub fn parse(&self, subject: &str) -> Result<RouteMatch, RouteError> {
        let captures = self.pattern.capture(subject)?;

        let mut params = captures.params.into_iter();
        let package_instance = if self.package_instance {
            params.next()
        } else {
            None
        };
        let service_params = self.service_params.iter().cloned().zip(params).collect();

        let mut tail = captures.tail.into_iter();
        let method = tail
            .next()
            .ok_or_else(|| RouteError::MissingTail(self.pattern.to_string()))?;

        Ok(RouteMatch {
            package_instance,
            service_params,
            method,
            method_params: tail.collect(),
        })
    }
}

impl Display for ServiceRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

pub struct ServiceRouteBuilder {
    template: String,
    package_instance: bool,
    service_params: Vec<String>,
}

impl ServiceRouteBuilder {
    /// Bind the first `*` of the template to the package instance.
    pub fn package_instance(mut self) -> Self {
        self.package_instance = true;
        self
    }

    /// Bind the next `*` of the template to a named service parameter.
    pub fn service_param(mut self, name: impl Into<String>) -> Self {
        self.service_params.push(name.into());
        self
    }

    pub fn build(self) -> Result<ServiceRoute, RouteError> {
        let prefix = SubjectPattern::parse(&self.template)?;
        if prefix.has_tail() {
            return Err(RouteError::InvalidTemplate {
                template: self.template,
                reason: "the trailing wildcard is appended by the route".to_string(),
            });
        }

        let expected = usize::from(self.package_instance) + self.service_params.len();
        if prefix.wildcards() != expected {
            return Err(RouteError::ArityMismatch {
                expected,
                got: prefix.wildcards(),
            });
        }

        for name in &self.service_params {
            subject::validate_token(name).map_err(RouteError::InvalidToken)?;
        }

        let pattern = SubjectPattern::parse(&format!(
            "{}{}{}",
            self.template, SEPARATOR, WILDCARD_TAIL
        ))?;

        Ok(ServiceRoute {
            pattern,
            package_instance: self.package_instance,
            service_params: self.service_params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn custom_subject() -> ServiceRoute {
        ServiceRoute::builder("root.*.custom_subject")
            .package_instance()
            .build()
            .unwrap()
    }

    fn subject_params() -> ServiceRoute {
        ServiceRoute::builder("root.*.svcsubjectparams.*")
            .package_instance()
            .service_param("clientid")
            .build()
            .unwrap()
    }

    #[test]
    fn test_handler_patterns() {
        assert_eq!(custom_subject().handler_pattern(), "root.*.custom_subject.>");
        assert_eq!(subject_params().handler_pattern(), "root.*.svcsubjectparams.*.>");

        let plain = ServiceRoute::builder("greeter").build().unwrap();
        assert_eq!(plain.handler_pattern(), "greeter.>");
    }

    #[test]
    fn test_build_rejects_arity_mismatch() {
        let err = ServiceRoute::builder("root.*.svc.*")
            .package_instance()
            .build()
            .unwrap_err();
        assert_eq!(err, RouteError::ArityMismatch { expected: 1, got: 2 });

        let err = ServiceRoute::builder("root.svc").package_instance().build().unwrap_err();
        assert_eq!(err, RouteError::ArityMismatch { expected: 1, got: 0 });

        assert!(matches!(
            ServiceRoute::builder("root.svc.>").build().unwrap_err(),
            RouteError::InvalidTemplate { .. }
        ));
    }

    #[test]
    fn test_subject_substitution_order() {
        let route = subject_params();
        let address = Address::instance("default").with_service_param("me");
        let subject = route
            .subject(&address, "MtWithSubjectParams", &["p1", "p2"])
            .unwrap();
        assert_eq!(subject, "root.default.svcsubjectparams.me.MtWithSubjectParams.p1.p2");
    }

    #[test]
    fn test_subject_rejects_bad_address() {
        let route = subject_params();

        let err = route
            .subject(&Address::instance("default"), "M", &[] as &[&str])
            .unwrap_err();
        assert_eq!(err, RouteError::ArityMismatch { expected: 1, got: 0 });

        let err = route
            .subject(&Address::new().with_service_param("me"), "M", &[] as &[&str])
            .unwrap_err();
        assert!(matches!(err, RouteError::AddressMismatch(_)));

        let err = route
            .subject(
                &Address::instance("de.fault").with_service_param("me"),
                "M",
                &[] as &[&str],
            )
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidToken(_)));
    }

    #[test]
    fn test_parse() {
        let route = subject_params();
        let parsed = route
            .parse("root.default.svcsubjectparams.me.MtWithSubjectParams.p1.p2")
            .unwrap();

        assert_eq!(parsed.package_instance(), Some("default"));
        assert_eq!(
            parsed.service_params(),
            &[("clientid".to_string(), "me".to_string())]
        );
        assert_eq!(parsed.method(), "MtWithSubjectParams");
        assert_eq!(parsed.method_params(), &["p1".to_string(), "p2".to_string()]);
    }

    #[test]
    fn test_parse_failures() {
        let route = custom_subject();

        assert!(matches!(
            route.parse("root.default.custom_subject").unwrap_err(),
            RouteError::SegmentCount { .. }
        ));
        assert!(matches!(
            route.parse("root.default.other.Method").unwrap_err(),
            RouteError::LiteralMismatch { position: 2, .. }
        ));
        assert!(matches!(
            route.parse("root..custom_subject.Method").unwrap_err(),
            RouteError::InvalidToken(_)
        ));
    }

    #[test]
    fn test_pattern_render_and_capture() {
        let pattern = SubjectPattern::parse("a.*.b.*").unwrap();
        assert_eq!(pattern.wildcards(), 2);
        assert!(!pattern.has_tail());

        let subject = pattern.render(&["x", "y"], &[] as &[&str]).unwrap();
        assert_eq!(subject, "a.x.b.y");

        let captures = pattern.capture(&subject).unwrap();
        assert_eq!(captures.params, vec!["x".to_string(), "y".to_string()]);
        assert!(captures.tail.is_empty());

        assert!(matches!(
            pattern.render(&["x"], &[] as &[&str]).unwrap_err(),
            RouteError::ArityMismatch { expected: 2, got: 1 }
        ));
        assert!(matches!(
            pattern.render(&["x", "y"], &["z"]).unwrap_err(),
            RouteError::UnexpectedTail(_)
        ));
        assert!(matches!(
            pattern.capture("a.x.b.y.z").unwrap_err(),
            RouteError::SegmentCount { .. }
        ));
    }

    const TOKEN: &str = "[A-Za-z0-9_-]{1,12}";

    proptest! {
        #[test]
        fn prop_subject_round_trip(
            instance in TOKEN,
            client in TOKEN,
            method in TOKEN,
            params in prop::collection::vec(TOKEN, 0..4),
        ) {
            let route = subject_params();
            let address = Address::instance(instance).with_service_param(client);

            let subject = route.subject(&address, &method, params.as_slice()).unwrap();
            let parsed = route.parse(&subject).unwrap();

            prop_assert_eq!(parsed.address(), address);
            prop_assert_eq!(parsed.method(), method.as_str());
            prop_assert_eq!(parsed.method_params(), params.as_slice());
        }
    }
}
