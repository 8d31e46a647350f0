use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{RealtimeError, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close codes the server uses for a rejected credential.
pub const AUTH_CLOSE_CODES: [u16; 3] = [4001, 4401, 4403];

fn auth_reason() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)auth|token|expired|unauthori[sz]ed").ok())
        .as_ref()
}

/// Whether a close frame means the credential was rejected.
pub fn is_auth_failure(code: Option<u16>, reason: &str) -> bool {
    if code.is_some_and(|c| AUTH_CLOSE_CODES.contains(&c)) {
        return true;
    }
    !reason.is_empty() && auth_reason().is_some_and(|re| re.is_match(reason))
}

/// Code and reason of an optional close frame.
pub fn close_details(frame: Option<&CloseFrame>) -> (Option<u16>, String) {
    match frame {
        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
        None => (None, String::new()),
    }
}

/// `base` with the credential appended as `token_param`. Any existing value
/// of that parameter is replaced.
pub fn socket_url(base: &str, token_param: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != token_param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(kept);
        if let Some(token) = token {
            pairs.append_pair(token_param, token);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

/// Opens the socket. HTTP 401/403 during the upgrade become
/// [`RealtimeError::Auth`], an expired `handshake_timeout` becomes
/// [`RealtimeError::Timeout`].
pub async fn connect_socket(
    base: &str,
    token_param: &str,
    token: Option<&str>,
    handshake_timeout: Duration,
) -> Result<WsStream> {
    let url = socket_url(base, token_param, token)?;
    log::debug!("Opening socket to {}{}", url.host_str().unwrap_or("?"), url.path());

    match timeout(handshake_timeout, connect_async(url.as_str())).await {
        Err(_) => Err(RealtimeError::Timeout(format!(
            "no handshake within {}ms",
            handshake_timeout.as_millis()
        ))),
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(WsError::Http(response))) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                Err(RealtimeError::Auth(format!("handshake rejected with HTTP {status}")))
            } else {
                Err(RealtimeError::WebSocket(format!("handshake failed with HTTP {status}")))
            }
        }
        Ok(Err(e)) => Err(RealtimeError::WebSocket(e.to_string())),
    }
}
