use anyhow::bail;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::issue::NewIssue;
use crate::web::{HealthResponse, IndexRequest, IndexResponse};

/// Blocking client for a running daemon.
pub struct IndexClient {
    remote_addr: String,
    client: reqwest::blocking::Client,
}

impl IndexClient {
    pub fn new(addr: &str) -> IndexClient {
        let remote_addr = addr.strip_suffix('/').unwrap_or(addr).to_string();

        IndexClient {
            remote_addr,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn get(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        log::debug!("GET {}{}", self.remote_addr, url);
        self.client.get(format!("{}{}", self.remote_addr, url))
    }

    fn post(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        log::debug!("POST {}{}", self.remote_addr, url);
        self.client.post(format!("{}{}", self.remote_addr, url))
    }

    pub fn health(&self) -> anyhow::Result<HealthResponse> {
        let resp = self.get("/health").send()?;
        handle_response(resp)
    }

    pub fn index(&self, issues: Vec<NewIssue>) -> anyhow::Result<IndexResponse> {
        let resp = self.post("/index").json(&IndexRequest { issues }).send()?;
        handle_response(resp)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum WebResponse<T> {
    Error { error: String },
    Data(T),
}

fn handle_response<T>(response: reqwest::blocking::Response) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let text = response.text()?;

    let web_response = serde_json::from_str::<WebResponse<T>>(&text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        err
    })?;

    match web_response {
        WebResponse::Data(data) => Ok(data),
        WebResponse::Error { error } => {
            bail!("{status}: {error}")
        }
    }
}
