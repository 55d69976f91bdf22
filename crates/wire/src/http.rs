//! Chunked-HTTP channel transport.
//!
//! Speaks the reference wire protocol: `POST` opens a turn channel whose
//! response body is newline-delimited JSON delivered in chunks, cancel is a
//! separate control request, and the canonical turn list is a plain `GET`.

use std::sync::Arc;
use std::time::Duration;

use tw_domain::error::{Error, Result};
use tw_domain::stream::BoxStream;
use tw_domain::turn::Turn;

use crate::traits::{ChannelTransport, TokenSource, TurnRequest};

/// [`ChannelTransport`] over chunked HTTP.
pub struct HttpChannel {
    base_url: String,
    token_source: Arc<dyn TokenSource>,
    client: reqwest::Client,
}

impl HttpChannel {
    pub fn new(
        base_url: impl Into<String>,
        token_source: Arc<dyn TokenSource>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        // No whole-request timeout: the channel body stays open for the
        // lifetime of a turn.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_source,
            client,
        })
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token_source.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn turns_url(&self, session_id: &str) -> String {
        format!("{}/v1/conversations/{}/turns", self.base_url, session_id)
    }

    fn cancel_url(&self, session_id: &str, channel_id: &str) -> String {
        format!(
            "{}/v1/conversations/{}/channels/{}/cancel",
            self.base_url, session_id, channel_id
        )
    }
}

#[async_trait::async_trait]
impl ChannelTransport for HttpChannel {
    async fn open(&self, req: TurnRequest) -> Result<BoxStream<'static, Result<String>>> {
        let url = self.turns_url(&req.session_id);

        tracing::debug!(url = %url, "opening turn channel");

        let resp = self
            .authed(self.client.post(&url))
            .header("Accept", "application/x-ndjson")
            .json(&req)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), err_text)));
        }

        let stream = async_stream::stream! {
            let mut resp = resp;
            loop {
                match resp.chunk().await {
                    Ok(Some(bytes)) => {
                        yield Ok(String::from_utf8_lossy(&bytes).into_owned());
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn cancel(&self, session_id: &str, channel_id: &str) -> Result<()> {
        let url = self.cancel_url(session_id, channel_id);

        tracing::debug!(url = %url, "requesting cancel");

        let resp = self
            .authed(self.client.post(&url))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        // 404/409 mean the turn already settled server-side; cancel is
        // idempotent, so that counts as success.
        if status.as_u16() == 404 || status.as_u16() == 409 {
            return Ok(());
        }
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), err_text)));
        }

        Ok(())
    }

    async fn fetch_turns(&self, session_id: &str) -> Result<Vec<Turn>> {
        let url = self.turns_url(session_id);

        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), resp_text)));
        }

        let turns: Vec<Turn> = serde_json::from_str(&resp_text)?;
        Ok(turns)
    }
}

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StaticToken;

    fn channel(base: &str) -> HttpChannel {
        HttpChannel::new(
            base,
            Arc::new(StaticToken("tok".into())),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn trailing_slash_trimmed_from_base_url() {
        let ch = channel("http://localhost:3210/");
        assert_eq!(
            ch.turns_url("s-1"),
            "http://localhost:3210/v1/conversations/s-1/turns"
        );
    }

    #[test]
    fn cancel_url_names_the_channel() {
        let ch = channel("http://localhost:3210");
        assert_eq!(
            ch.cancel_url("s-1", "ch-42"),
            "http://localhost:3210/v1/conversations/s-1/channels/ch-42/cancel"
        );
    }
}
