//! Request and task scopes.
//!
//! A [`RequestScope`] is what a request handler holds while serving one HTTP
//! request: who is calling, for which tenant, in which locale, plus the
//! request's own lifetime (cancellation and deadline).
//!
//! A [`TaskScope`] is derived from it when a consumer loop dequeues a task.
//! Exactly four values are carried forward (request reference, tenant, user,
//! locale) together with the origin's correlation and session ids for trace
//! linkage. The request's lifetime is never carried forward: a task may run
//! long after the response that enqueued it was sent or the client went away.

use std::collections::HashMap;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::{Span, error, field};

use echoboard_core::{CorrelationId, Locale, Tenant, User};

use crate::i18n::Catalog;
use crate::task::JobError;

/// The parts of an HTTP request a job may want to refer back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Id assigned to the request at the edge (e.g. `X-Request-Id`).
    pub request_id: String,
    pub method: String,
    pub path: String,
    /// Base URL of the tenant site, used by jobs building links in emails.
    pub base_url: Option<String>,
}

impl RequestInfo {
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            path: path.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Scope of one request, owned by the request handler.
///
/// Cloning is cheap and clones share the same cancellation flag.
#[derive(Debug, Clone)]
pub struct RequestScope {
    request: Option<Arc<RequestInfo>>,
    tenant: Option<Arc<Tenant>>,
    user: Option<Arc<User>>,
    locale: Locale,
    locale_negotiated: bool,
    correlation_id: CorrelationId,
    session_id: Option<String>,
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestScope {
    /// An anonymous scope with a fresh correlation id and the default locale.
    pub fn new() -> Self {
        Self {
            request: None,
            tenant: None,
            user: None,
            locale: Locale::default(),
            locale_negotiated: false,
            correlation_id: CorrelationId::new(),
            session_id: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    pub fn with_request(mut self, request: impl Into<Arc<RequestInfo>>) -> Self {
        self.request = Some(request.into());
        self
    }

    /// Set the tenant; the tenant's locale becomes the scope locale unless one
    /// was already negotiated with [`with_locale`](Self::with_locale).
    pub fn with_tenant(mut self, tenant: impl Into<Arc<Tenant>>) -> Self {
        let tenant = tenant.into();
        if !self.locale_negotiated {
            self.locale = tenant.locale.clone();
        }
        self.tenant = Some(tenant);
        self
    }

    pub fn with_user(mut self, user: impl Into<Arc<User>>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the locale negotiated for this request; it wins over the tenant's.
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self.locale_negotiated = true;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn request(&self) -> Option<&Arc<RequestInfo>> {
        self.request.as_ref()
    }

    pub fn tenant(&self) -> Option<&Arc<Tenant>> {
        self.tenant.as_ref()
    }

    pub fn user(&self) -> Option<&Arc<User>> {
        self.user.as_ref()
    }

    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Mark the request as cancelled (client disconnected, response sent, ...).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancelled or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Scope of one task execution.
///
/// Owned exclusively by the consumer loop running the task and handed to the
/// job as `&mut`; values stored with [`set`](Self::set) never leak into other
/// executions.
#[derive(Debug)]
pub struct TaskScope {
    worker_id: usize,
    task_name: String,
    correlation_id: CorrelationId,
    origin_correlation_id: Option<CorrelationId>,
    session_id: Option<String>,
    request: Option<Arc<RequestInfo>>,
    tenant: Option<Arc<Tenant>>,
    user: Option<Arc<User>>,
    locale: Locale,
    values: HashMap<String, JsonValue>,
}

impl TaskScope {
    /// Derive the scope for one execution of `task_name` on `worker_id`.
    ///
    /// Always assigns a fresh correlation id. When an origin is given, the
    /// request reference, tenant and user are shared by `Arc` (same identity as
    /// the origin's) and the locale is copied.
    pub fn derive(
        worker_id: usize,
        task_name: impl Into<String>,
        origin: Option<&RequestScope>,
    ) -> Self {
        let mut scope = Self {
            worker_id,
            task_name: task_name.into(),
            correlation_id: CorrelationId::new(),
            origin_correlation_id: None,
            session_id: None,
            request: None,
            tenant: None,
            user: None,
            locale: Locale::default(),
            values: HashMap::new(),
        };

        if let Some(origin) = origin {
            scope.request = origin.request.clone();
            scope.tenant = origin.tenant.clone();
            scope.user = origin.user.clone();
            scope.locale = origin.locale.clone();
            scope.origin_correlation_id = Some(origin.correlation_id);
            scope.session_id = origin.session_id.clone();
        }

        scope
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Correlation id of the request that submitted this task, if any.
    pub fn origin_correlation_id(&self) -> Option<CorrelationId> {
        self.origin_correlation_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn request(&self) -> Option<&Arc<RequestInfo>> {
        self.request.as_ref()
    }

    pub fn tenant(&self) -> Option<&Arc<Tenant>> {
        self.tenant.as_ref()
    }

    pub fn user(&self) -> Option<&Arc<User>> {
        self.user.as_ref()
    }

    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    /// Store a value private to this execution.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// Resolve `key` against `catalog` in this execution's locale.
    pub fn localize<'a>(&self, catalog: &'a Catalog, key: &'a str) -> &'a str {
        catalog.lookup(&self.locale, key)
    }

    /// Span carrying this execution's identity; the consumer loop runs the job
    /// inside it so every event the job emits is correlated.
    pub fn span(&self) -> Span {
        let span = tracing::info_span!(
            "task",
            worker_id = self.worker_id,
            task = %self.task_name,
            correlation_id = %self.correlation_id,
            origin_correlation_id = field::Empty,
            request_id = field::Empty,
            tenant_id = field::Empty,
            user_id = field::Empty,
        );
        if let Some(origin) = self.origin_correlation_id {
            span.record("origin_correlation_id", field::display(origin));
        }
        if let Some(request) = &self.request {
            span.record("request_id", request.request_id.as_str());
        }
        if let Some(tenant) = &self.tenant {
            span.record("tenant_id", field::display(tenant.id));
        }
        if let Some(user) = &self.user {
            span.record("user_id", field::display(user.id));
        }
        span
    }

    /// Log `err` with the caller's location and a backtrace, then hand it back
    /// so the job can return it:
    ///
    /// ```ignore
    /// mailer.send(&message).map_err(|e| scope.failure(e))?;
    /// ```
    #[track_caller]
    pub fn failure(&self, err: impl Into<JobError>) -> JobError {
        let err = err.into();
        let location = Location::caller();
        let backtrace = std::backtrace::Backtrace::capture();
        let message = format!("{err:#}");
        error!(
            worker_id = self.worker_id,
            task = %self.task_name,
            correlation_id = %self.correlation_id,
            location = %location,
            backtrace = %backtrace,
            error = %message,
            "task failure"
        );
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::Mutex;

    use echoboard_core::{TenantId, UserId};
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    type Fields = HashMap<String, String>;

    struct FieldVisitor<'a>(&'a mut Fields);

    impl Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }
    }

    /// Collects event fields and span fields (merged per layer) for assertions.
    #[derive(Clone, Default)]
    struct Captured {
        events: Arc<Mutex<Vec<Fields>>>,
        spans: Arc<Mutex<Fields>>,
    }

    impl<S: Subscriber> Layer<S> for Captured {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            attrs.record(&mut FieldVisitor(&mut self.spans.lock().unwrap()));
        }

        fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut FieldVisitor(&mut self.spans.lock().unwrap()));
        }

        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = Fields::new();
            event.record(&mut FieldVisitor(&mut fields));
            self.events.lock().unwrap().push(fields);
        }
    }

    fn capture<T>(f: impl FnOnce() -> T) -> (T, Captured) {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, captured)
    }

    fn tenant() -> Tenant {
        Tenant::new(TenantId::new(), "Demo", "demo")
    }

    #[test]
    fn derive_without_origin_is_anonymous() {
        let scope = TaskScope::derive(3, "cleanup", None);
        assert_eq!(scope.worker_id(), 3);
        assert_eq!(scope.task_name(), "cleanup");
        assert!(scope.tenant().is_none());
        assert!(scope.user().is_none());
        assert!(scope.request().is_none());
        assert!(scope.origin_correlation_id().is_none());
        assert_eq!(scope.locale().as_str(), "en");
    }

    #[test]
    fn derive_shares_identity_and_links_correlation() {
        let tenant = Arc::new(tenant());
        let user = Arc::new(User::new(UserId::new(), tenant.id, "Jo", "jo@example.com"));
        let request = Arc::new(RequestInfo::new("req-7", "POST", "/api/v1/posts"));
        let origin = RequestScope::new()
            .with_request(Arc::clone(&request))
            .with_tenant(Arc::clone(&tenant))
            .with_user(Arc::clone(&user))
            .with_locale("fr".parse().unwrap())
            .with_session_id("sess-1");

        let scope = TaskScope::derive(1, "notify", Some(&origin));

        assert!(Arc::ptr_eq(scope.tenant().unwrap(), &tenant));
        assert!(Arc::ptr_eq(scope.user().unwrap(), &user));
        assert!(Arc::ptr_eq(scope.request().unwrap(), &request));
        assert_eq!(scope.locale().as_str(), "fr");
        assert_eq!(scope.session_id(), Some("sess-1"));
        assert_eq!(scope.origin_correlation_id(), Some(origin.correlation_id()));
        assert_ne!(scope.correlation_id(), origin.correlation_id());
    }

    #[test]
    fn each_execution_gets_its_own_correlation_id() {
        let origin = RequestScope::new();
        let a = TaskScope::derive(1, "a", Some(&origin));
        let b = TaskScope::derive(1, "a", Some(&origin));
        assert_ne!(a.correlation_id(), b.correlation_id());
    }

    #[test]
    fn tenant_locale_is_used_unless_negotiated() {
        let fr = tenant().with_locale("fr".parse().unwrap());
        let scope = RequestScope::new().with_tenant(fr.clone());
        assert_eq!(scope.locale().as_str(), "fr");

        let scope = RequestScope::new()
            .with_locale("de".parse().unwrap())
            .with_tenant(fr.clone());
        assert_eq!(scope.locale().as_str(), "de");

        let scope = RequestScope::new()
            .with_locale(Locale::default())
            .with_tenant(fr);
        assert_eq!(scope.locale().as_str(), "en");
    }

    #[test]
    fn cancellation_is_shared_by_clones() {
        let scope = RequestScope::new();
        let clone = scope.clone();
        clone.cancel();
        assert!(scope.is_cancelled());
    }

    #[test]
    fn passed_deadline_counts_as_cancelled() {
        let scope = RequestScope::new().with_deadline(Instant::now());
        assert!(scope.is_cancelled());
    }

    #[test]
    fn values_are_private_to_the_execution() {
        let origin = RequestScope::new();
        let mut a = TaskScope::derive(1, "a", Some(&origin));
        let b = TaskScope::derive(2, "a", Some(&origin));
        a.set("attempt", 1);
        assert_eq!(a.get("attempt"), Some(&JsonValue::from(1)));
        assert!(b.get("attempt").is_none());
    }

    #[test]
    fn failure_returns_the_same_error() {
        let scope = TaskScope::derive(1, "send_mail", None);
        let err = scope.failure(std::io::Error::other("smtp down"));
        assert_eq!(err.to_string(), "smtp down");
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn failure_logs_error_with_caller_location() {
        let scope = TaskScope::derive(4, "send_mail", None);
        let (err, captured) = capture(|| scope.failure(std::io::Error::other("smtp down")));
        assert_eq!(err.to_string(), "smtp down");

        let events = captured.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event["message"], "task failure");
        assert_eq!(event["error"], "smtp down");
        assert_eq!(event["task"], "send_mail");
        assert_eq!(event["worker_id"], "4");
        assert_eq!(event["correlation_id"], scope.correlation_id().to_string());
        assert!(event["location"].contains("scope.rs"), "{}", event["location"]);
        assert!(event.contains_key("backtrace"));
    }

    #[test]
    fn span_carries_request_id_and_identity() {
        let tenant = Arc::new(tenant());
        let origin = RequestScope::new()
            .with_request(RequestInfo::new("req-42", "POST", "/api/v1/posts"))
            .with_tenant(Arc::clone(&tenant));
        let scope = TaskScope::derive(2, "notify", Some(&origin));
        assert_eq!(scope.request().map(|r| r.request_id.as_str()), Some("req-42"));

        let (_, captured) = capture(|| drop(scope.span()));

        let spans = captured.spans.lock().unwrap();
        assert_eq!(spans["request_id"], "req-42");
        assert_eq!(spans["tenant_id"], tenant.id.to_string());
        assert_eq!(spans["origin_correlation_id"], origin.correlation_id().to_string());
    }
}
