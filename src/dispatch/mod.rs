//! Completion dispatch cascade.
//!
//! A completion is requested by walking models in priority order, and for
//! each model every not-yet-revoked key (shuffled per model) against every
//! configured API version. Attempts run strictly one after another. The
//! first accepted reply wins; a policy rejection ends the call at once;
//! a revoked key is skipped for the rest of the call.

use crate::config::{CredentialPool, DispatchConfig, mask_key};
use crate::core::error::{DispatchError, EspejoError};
use crate::providers::gemini::{
    GeminiClient, GenerateContentRequest, GenerationConfig, build_payload,
};
use crate::providers::{
    AttemptOutcome, InlineData, Message, ResponseClassifier, Route, RouteTransport,
};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod inflight;

pub use inflight::{InFlight, InFlightTicket};

/// A successful completion and the route that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub api_version: String,
    pub attempts: usize,
}

pub struct Dispatcher {
    transport: Arc<dyn RouteTransport>,
    config: DispatchConfig,
    pool: CredentialPool,
    classifier: ResponseClassifier,
    generation_config: Option<GenerationConfig>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn RouteTransport>,
        config: DispatchConfig,
        pool: CredentialPool,
    ) -> Result<Self, EspejoError> {
        let classifier = ResponseClassifier::from_config(&config)?;
        Ok(Self {
            transport,
            config,
            pool,
            classifier,
            generation_config: None,
        })
    }

    /// Dispatcher backed by the real HTTP transport.
    pub fn gemini(config: DispatchConfig, pool: CredentialPool) -> Result<Self, EspejoError> {
        let client = GeminiClient::new(config.base_url.clone(), config.request_timeout())?;
        Self::new(Arc::new(client), config, pool)
    }

    pub fn with_generation_config(mut self, generation_config: GenerationConfig) -> Self {
        self.generation_config = Some(generation_config);
        self
    }

    /// Requests a completion for `messages`, which must already end with the
    /// caller's new user turn.
    pub async fn complete(
        &self,
        messages: &[Message],
        system_instruction: Option<&str>,
        image: Option<&InlineData>,
    ) -> Result<Completion, DispatchError> {
        let payload = build_payload(
            messages,
            system_instruction,
            image,
            &self.config.default_image_caption,
            self.generation_config.clone(),
        );
        if payload.contents.is_empty() {
            return Err(DispatchError::EmptyConversation);
        }

        let mut revoked: HashSet<&str> = HashSet::new();
        let mut attempts = 0;

        for model in &self.config.models {
            'keys: for key in self.key_order() {
                if revoked.contains(key) {
                    continue;
                }
                for version in &self.config.api_versions {
                    attempts += 1;
                    let route = Route {
                        model: model.as_str(),
                        api_key: key,
                        api_version: version.as_str(),
                    };
                    debug!(model = %model, version = %version, key = %mask_key(key), attempt = attempts, "Trying route");

                    match self.attempt(&route, &payload).await {
                        AttemptOutcome::Success(text) => {
                            info!(model = %model, version = %version, attempts, "Completion succeeded");
                            return Ok(Completion {
                                text,
                                model: model.clone(),
                                api_version: version.clone(),
                                attempts,
                            });
                        }
                        AttemptOutcome::CredentialRevoked(reason) => {
                            warn!(key = %mask_key(key), "Key revoked, excluding it: {}", reason);
                            revoked.insert(key);
                            continue 'keys;
                        }
                        AttemptOutcome::PolicyBlocked(reason) => {
                            warn!(model = %model, "Content policy rejection: {}", reason);
                            return Err(DispatchError::PolicyBlocked { reason });
                        }
                        AttemptOutcome::RateLimited(reason) => {
                            debug!(model = %model, "Rate limited: {}", reason);
                            let backoff = self.config.rate_limit_backoff();
                            if !backoff.is_zero() {
                                tokio::time::sleep(backoff).await;
                            }
                        }
                        AttemptOutcome::Transient(reason) => {
                            debug!(model = %model, version = %version, "Transient failure: {}", reason);
                        }
                    }
                }
            }
        }

        warn!(attempts, "All routes exhausted");
        Err(DispatchError::AllRoutesExhausted { attempts })
    }

    /// Same as [`Dispatcher::complete`], abandoned as soon as `cancel` fires.
    pub async fn complete_cancellable(
        &self,
        messages: &[Message],
        system_instruction: Option<&str>,
        image: Option<&InlineData>,
        cancel: &CancellationToken,
    ) -> Result<Completion, DispatchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            result = self.complete(messages, system_instruction, image) => result,
        }
    }

    fn key_order(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.pool.keys().iter().map(String::as_str).collect();
        if self.config.shuffle_keys {
            keys.shuffle(&mut rand::thread_rng());
        }
        keys
    }

    async fn attempt(
        &self,
        route: &Route<'_>,
        payload: &GenerateContentRequest,
    ) -> AttemptOutcome {
        let timeout = self.config.request_timeout();
        let sent = if timeout.is_zero() {
            Ok(self.transport.send(route, payload).await)
        } else {
            tokio::time::timeout(timeout, self.transport.send(route, payload)).await
        };

        match sent {
            Ok(Ok(response)) => self.classifier.classify(&response),
            Ok(Err(e)) => AttemptOutcome::Transient(e.to_string()),
            Err(_) => AttemptOutcome::Transient(format!(
                "no reply within {}s",
                timeout.as_secs_f32()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RouteResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    type Script = Box<dyn Fn(&str, &str, &str) -> Result<RouteResponse, EspejoError> + Send + Sync>;

    struct ScriptedTransport {
        script: Script,
        calls: Mutex<Vec<(String, String, String)>>,
        payloads: Mutex<Vec<serde_json::Value>>,
    }

    impl ScriptedTransport {
        fn new(
            script: impl Fn(&str, &str, &str) -> Result<RouteResponse, EspejoError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
                payloads: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RouteTransport for ScriptedTransport {
        async fn send(
            &self,
            route: &Route<'_>,
            request: &GenerateContentRequest,
        ) -> Result<RouteResponse, EspejoError> {
            self.calls.lock().unwrap().push((
                route.model.to_string(),
                route.api_key.to_string(),
                route.api_version.to_string(),
            ));
            self.payloads
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            (self.script)(route.model, route.api_key, route.api_version)
        }
    }

    fn ok(text: &str) -> Result<RouteResponse, EspejoError> {
        Ok(RouteResponse {
            status: 200,
            body: format!(r#"{{"candidates":[{{"content":{{"parts":[{{"text":"{}"}}]}}}}]}}"#, text),
        })
    }

    fn error(status: u16, message: &str) -> Result<RouteResponse, EspejoError> {
        Ok(RouteResponse {
            status,
            body: format!(r#"{{"error":{{"code":{},"message":"{}"}}}}"#, status, message),
        })
    }

    fn config(models: &[&str], versions: &[&str], shuffle: bool) -> DispatchConfig {
        DispatchConfig {
            models: models.iter().map(|s| s.to_string()).collect(),
            api_versions: versions.iter().map(|s| s.to_string()).collect(),
            shuffle_keys: shuffle,
            rate_limit_backoff_ms: 0,
            ..DispatchConfig::default()
        }
    }

    fn dispatcher(
        transport: Arc<ScriptedTransport>,
        config: DispatchConfig,
        keys: &[&str],
    ) -> Dispatcher {
        Dispatcher::new(transport, config, CredentialPool::new(keys.iter().copied())).unwrap()
    }

    fn conversation() -> Vec<Message> {
        vec![Message::user("hola")]
    }

    #[tokio::test]
    async fn first_route_wins_when_everything_succeeds() {
        let transport = ScriptedTransport::new(|model, key, version| ok(&format!("{model}/{key}/{version}")));
        let d = dispatcher(transport.clone(), config(&["m1", "m2"], &["v1", "v2"], false), &["k1", "k2"]);

        let completion = d.complete(&conversation(), None, None).await.unwrap();

        assert_eq!(completion.text, "m1/k1/v1");
        assert_eq!(completion.model, "m1");
        assert_eq!(completion.attempts, 1);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn shuffled_order_still_returns_the_first_attempt() {
        let transport = ScriptedTransport::new(|_, key, _| ok(key));
        let d = dispatcher(transport.clone(), config(&["m1"], &["v1"], true), &["k1", "k2", "k3"]);

        let completion = d.complete(&conversation(), None, None).await.unwrap();
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(completion.text, calls[0].1);
    }

    #[tokio::test]
    async fn revoked_key_is_skipped_and_never_retried_on_later_models() {
        let transport = ScriptedTransport::new(|model, key, version| match (model, key, version) {
            (_, "k1", _) => error(403, "Your API key was reported as leaked"),
            ("m1", "k2", "v1") => ok("from k2"),
            _ => error(500, "internal"),
        });
        let d = dispatcher(transport.clone(), config(&["m1", "m2"], &["v1", "v2"], true), &["k1", "k2"]);

        let completion = d.complete(&conversation(), None, None).await.unwrap();

        assert_eq!(completion.text, "from k2");
        assert_eq!(completion.model, "m1");
        let calls = transport.calls();
        assert!(calls.iter().all(|(m, _, _)| m == "m1"));
        assert!(calls.iter().filter(|(_, k, _)| k == "k1").count() <= 1);
    }

    #[tokio::test]
    async fn revoked_key_is_excluded_for_remaining_models() {
        let transport = ScriptedTransport::new(|model, key, _| match (model, key) {
            (_, "k1") => error(403, "API key reported as leaked"),
            ("m2", "k2") => ok("m2 answered"),
            _ => error(503, "overloaded"),
        });
        let d = dispatcher(transport.clone(), config(&["m1", "m2"], &["v1", "v2"], false), &["k1", "k2"]);

        let completion = d.complete(&conversation(), None, None).await.unwrap();

        assert_eq!(completion.model, "m2");
        let k1_calls: Vec<_> = transport.calls().into_iter().filter(|(_, k, _)| k == "k1").collect();
        assert_eq!(k1_calls, vec![("m1".to_string(), "k1".to_string(), "v1".to_string())]);
    }

    #[tokio::test]
    async fn policy_block_short_circuits() {
        let transport = ScriptedTransport::new(|_, _, _| error(400, "Blocked due to SAFETY"));
        let d = dispatcher(transport.clone(), config(&["m1", "m2"], &["v1", "v2"], true), &["k1", "k2"]);

        let err = d.complete(&conversation(), None, None).await.unwrap_err();

        assert!(matches!(err, DispatchError::PolicyBlocked { .. }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn all_transient_failures_exhaust_exactly_every_route() {
        let transport = ScriptedTransport::new(|_, _, _| error(500, "boom"));
        let d = dispatcher(
            transport.clone(),
            config(&["m1", "m2", "m3"], &["v1", "v2"], true),
            &["k1", "k2"],
        );

        let err = d.complete(&conversation(), None, None).await.unwrap_err();

        assert_eq!(err, DispatchError::AllRoutesExhausted { attempts: 12 });
        assert_eq!(transport.calls().len(), 12);
    }

    #[tokio::test]
    async fn network_errors_and_rate_limits_are_transient() {
        let transport = ScriptedTransport::new(|_, key, version| match (key, version) {
            ("k1", "v1") => Err(EspejoError::Network("connection reset".to_string())),
            ("k1", "v2") => error(429, "Resource has been exhausted"),
            _ => ok("third time lucky"),
        });
        let d = dispatcher(transport.clone(), config(&["m1"], &["v1", "v2"], false), &["k1", "k2"]);

        let completion = d.complete(&conversation(), None, None).await.unwrap();
        assert_eq!(completion.attempts, 3);
        assert_eq!(completion.text, "third time lucky");
    }

    #[tokio::test]
    async fn shuffle_tries_every_key_once_per_version_for_each_model() {
        let transport = ScriptedTransport::new(|_, _, _| error(500, "boom"));
        let keys = ["k1", "k2", "k3", "k4"];
        let d = dispatcher(transport.clone(), config(&["m1", "m2"], &["v1"], true), &keys);

        let _ = d.complete(&conversation(), None, None).await;

        let mut per_model: HashMap<String, Vec<String>> = HashMap::new();
        for (model, key, _) in transport.calls() {
            per_model.entry(model).or_default().push(key);
        }
        for model in ["m1", "m2"] {
            let mut tried = per_model.remove(model).unwrap();
            tried.sort();
            assert_eq!(tried, keys);
        }
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected_without_network() {
        let transport = ScriptedTransport::new(|_, _, _| ok("unused"));
        let d = dispatcher(transport.clone(), config(&["m1"], &["v1"], false), &["k1"]);

        let err = d.complete(&[], None, None).await.unwrap_err();
        assert_eq!(err, DispatchError::EmptyConversation);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_pool_exhausts_immediately() {
        let transport = ScriptedTransport::new(|_, _, _| ok("unused"));
        let d = dispatcher(transport.clone(), config(&["m1"], &["v1"], false), &[]);

        let err = d.complete(&conversation(), None, None).await.unwrap_err();
        assert_eq!(err, DispatchError::AllRoutesExhausted { attempts: 0 });
    }

    #[tokio::test]
    async fn image_turn_reaches_the_wire_with_both_parts() {
        let transport = ScriptedTransport::new(|_, _, _| ok("a cat"));
        let d = dispatcher(transport.clone(), config(&["m1"], &["v1"], false), &["k1"]);
        let messages = vec![
            Message::user("hi"),
            Message::model("hello"),
            Message::user("how are you"),
            Message::model("fine"),
            Message::user("what is this?"),
        ];
        let image = InlineData::new("image/png", "iVBORw0KGgo=");

        d.complete(&messages, Some("You are a mirror"), Some(&image))
            .await
            .unwrap();

        let payload = transport.payloads.lock().unwrap()[0].clone();
        let last = payload["contents"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["role"], "user");
        assert_eq!(last["parts"][0]["text"], "what is this?");
        assert_eq!(last["parts"][1]["inline_data"]["data"], "iVBORw0KGgo=");
        assert_eq!(payload["system_instruction"]["parts"][0]["text"], "You are a mirror");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_routes_time_out_and_the_cascade_moves_on() {
        struct Hanging;

        #[async_trait]
        impl RouteTransport for Hanging {
            async fn send(
                &self,
                route: &Route<'_>,
                _request: &GenerateContentRequest,
            ) -> Result<RouteResponse, EspejoError> {
                if route.api_version == "v1" {
                    std::future::pending::<()>().await;
                }
                ok("stable path")
            }
        }

        let mut cfg = config(&["m1"], &["v1", "v2"], false);
        cfg.request_timeout_secs = 5;
        let d = Dispatcher::new(Arc::new(Hanging), cfg, CredentialPool::new(["k1"])).unwrap();

        let completion = d.complete(&conversation(), None, None).await.unwrap();
        assert_eq!(completion.api_version, "v2");
        assert_eq!(completion.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_follows_rate_limits_only() {
        let mut cfg = config(&["m1"], &["v1", "v2"], false);
        cfg.rate_limit_backoff_ms = 1500;

        let limited = ScriptedTransport::new(|_, _, version| match version {
            "v1" => error(429, "Resource has been exhausted"),
            _ => ok("after backoff"),
        });
        let d = dispatcher(limited, cfg.clone(), &["k1"]);
        let started = tokio::time::Instant::now();
        let completion = d.complete(&conversation(), None, None).await.unwrap();
        assert_eq!(completion.text, "after backoff");
        assert!(started.elapsed() >= Duration::from_millis(1500));

        let failing = ScriptedTransport::new(|_, _, version| match version {
            "v1" => error(500, "Internal error"),
            _ => ok("no wait"),
        });
        let d = dispatcher(failing, cfg, &["k1"]);
        let started = tokio::time::Instant::now();
        let completion = d.complete(&conversation(), None, None).await.unwrap();
        assert_eq!(completion.text, "no wait");
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn cancelled_calls_resolve_to_cancelled() {
        let transport = ScriptedTransport::new(|_, _, _| ok("late"));
        let d = dispatcher(transport, config(&["m1"], &["v1"], false), &["k1"]);
        let token = CancellationToken::new();
        token.cancel();

        let err = d
            .complete_cancellable(&conversation(), None, None, &token)
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
    }
}
