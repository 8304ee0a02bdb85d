//! Thin admin-API client backing the CLI subcommands.

use orch_domain::config::FlagSpec;

use super::{EXIT_BACKEND, EXIT_OK, EXIT_OTHER, EXIT_POLICY};

pub struct AdminClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new(base: &str, token: Option<String>) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{path}", self.base));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Run a request and render the JSON response; maps transport and
    /// status failures onto the CLI exit codes.
    async fn run(&self, req: reqwest::RequestBuilder) -> u8 {
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                eprintln!("error: server unreachable: {e}");
                return EXIT_BACKEND;
            }
        };
        let status = resp.status();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".into());
        let rendered = serde_json::from_str::<serde_json::Value>(&body)
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or(body);

        if status.is_success() {
            println!("{rendered}");
            EXIT_OK
        } else {
            eprintln!("error ({status}): {rendered}");
            match status.as_u16() {
                403 | 429 => EXIT_POLICY,
                502 | 503 | 504 => EXIT_BACKEND,
                _ => EXIT_OTHER,
            }
        }
    }

    pub async fn reload_agents(&self) -> u8 {
        self.run(self.request(reqwest::Method::POST, "/admin/agents/reload"))
            .await
    }

    pub async fn breaker_status(&self) -> u8 {
        self.run(self.request(reqwest::Method::GET, "/admin/breaker"))
            .await
    }

    pub async fn breaker_override(&self, code: &str, duration_secs: i64) -> u8 {
        self.run(
            self.request(reqwest::Method::POST, "/admin/breaker/override")
                .json(&serde_json::json!({ "code": code, "durationSecs": duration_secs })),
        )
        .await
    }

    pub async fn flag_set(&self, spec: &FlagSpec) -> u8 {
        self.run(self.request(reqwest::Method::POST, "/admin/flags").json(spec))
            .await
    }

    pub async fn cost_daily(&self, date: Option<&str>) -> u8 {
        let path = match date {
            Some(d) => format!("/admin/cost/daily?date={d}"),
            None => "/admin/cost/daily".to_string(),
        };
        self.run(self.request(reqwest::Method::GET, &path)).await
    }
}
