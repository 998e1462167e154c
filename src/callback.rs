// Browser authorization with a loopback callback listener.
//
// The provider is asked for an implicit-grant token, which it returns in the
// URL fragment of the redirect. Browsers never send the fragment to the
// server, so the first request on the callback path gets a tiny script that
// moves the fragment into the query string and reloads. The second request
// carries the token.
//
// The listener is owned by `CallbackServer` and lives only for one
// authorization: the first query carrying parameters resolves a oneshot
// channel. The accept loop then stops, the socket is released and in-flight
// connections are drained.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{open_or_print, Browser};
use crate::config::{Config, CALLBACK_PATH};
use crate::credential::Credential;
use crate::error::{OpenError, OpenResult};

/// Rewrites `#access_token=...` into `?access_token=...` and reloads.
const HTML_REWRITE_FRAGMENT: &str =
    "<script>location.replace(location.href.replace('#', '?'))</script>";

const HTML_DONE: &str = r#"<!DOCTYPE html>
<html>
<head><title>gdocs-open</title></head>
<body>
  <p>Close this page and return to program!</p>
</body>
</html>"#;

/// How long in-flight connections get to finish once the token has arrived.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const OAUTH_STATE: &str = "gdocs-open";

type QueryParams = HashMap<String, String>;
type PendingQuery = Arc<Mutex<Option<oneshot::Sender<QueryParams>>>>;

/// Something that can produce a fresh credential.
pub trait Authorizer {
    fn authorize(&self) -> OpenResult<Credential>;
}

/// Interactive authorization through the user's browser.
pub struct BrowserAuthorizer {
    config: Config,
    browser: Box<dyn Browser>,
}

impl BrowserAuthorizer {
    pub fn new(config: Config, browser: Box<dyn Browser>) -> Self {
        Self { config, browser }
    }
}

impl Authorizer for BrowserAuthorizer {
    /// Blocks until the user completes the consent page. There is no timeout.
    fn authorize(&self) -> OpenResult<Credential> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(acquire(&self.config, self.browser.as_ref()))
    }
}

/// Run the full flow: bind, send the user to the consent page, wait for the
/// redirect and build a credential from it.
pub async fn acquire(config: &Config, browser: &dyn Browser) -> OpenResult<Credential> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.callback_port));
    let server = CallbackServer::bind(addr).await?;

    let auth_url = authorization_url(config)?;
    info!(port = config.callback_port, "Waiting for browser authorization");
    open_or_print(browser, auth_url.as_str());

    let params = server.wait_for_query().await?;
    credential_from_query(&params)
}

/// Consent page URL requesting an implicit-grant access token.
pub fn authorization_url(config: &Config) -> OpenResult<Url> {
    let mut url = Url::parse(&config.auth_url)?;
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_url())
        .append_pair("response_type", "token")
        .append_pair("scope", &config.scope)
        .append_pair("state", OAUTH_STATE);
    Ok(url)
}

/// Turn the redirect's query parameters into a credential.
pub fn credential_from_query(params: &QueryParams) -> OpenResult<Credential> {
    if let Some(error) = params.get("error") {
        let message = params
            .get("error_description")
            .cloned()
            .unwrap_or_else(|| error.clone());
        return Err(OpenError::Authorization(message));
    }

    match params.get("access_token").filter(|t| !t.is_empty()) {
        Some(token) => Ok(Credential::bearer(token.as_str())),
        None => Err(OpenError::Authorization(
            "redirect did not include an access token".into(),
        )),
    }
}

/// Loopback HTTP listener for a single authorization redirect.
pub struct CallbackServer {
    listener: TcpListener,
}

impl CallbackServer {
    pub async fn bind(addr: SocketAddr) -> OpenResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        debug!(addr = %addr, "Callback listener bound");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> OpenResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve the callback path until a request whose query carries parameters
    /// arrives, then shut down and return its parameters.
    pub async fn wait_for_query(self) -> OpenResult<QueryParams> {
        let (result_tx, result_rx) = oneshot::channel();
        let pending: PendingQuery = Arc::new(Mutex::new(Some(result_tx)));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let server = tokio::spawn(serve(self.listener, pending, shutdown_rx));

        let params = result_rx.await.map_err(|_| {
            OpenError::Authorization("callback listener stopped before a token arrived".into())
        });

        let _ = shutdown_tx.send(());
        if let Err(e) = server.await {
            warn!(error = %e, "Callback listener task failed");
        }
        info!("Callback listener stopped");

        params
    }
}

async fn serve(listener: TcpListener, pending: PendingQuery, mut shutdown: oneshot::Receiver<()>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Callback connection");
                    let pending = pending.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, pending).await {
                            warn!(error = %e, "Error handling callback request");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Error accepting connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown => break,
        }
    }

    drop(listener);

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("Aborting idle callback connections");
        connections.shutdown().await;
    }
}

async fn handle_connection(mut stream: TcpStream, pending: PendingQuery) -> OpenResult<()> {
    let mut buffer = [0u8; 4096];
    let mut n = 0;
    // Only the request line matters; it may arrive over several reads.
    while n < buffer.len() && !buffer[..n].contains(&b'\n') {
        let read = stream.read(&mut buffer[n..]).await?;
        if read == 0 {
            break;
        }
        n += read;
    }
    let request = String::from_utf8_lossy(&buffer[..n]);

    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();
    if parts.len() < 2 {
        return respond(&mut stream, 400, "text/plain", "Bad Request").await;
    }
    if parts[0] != "GET" {
        return respond(&mut stream, 405, "text/plain", "Method Not Allowed").await;
    }

    let parsed = match Url::parse(&format!("http://127.0.0.1{}", parts[1])) {
        Ok(u) => u,
        Err(_) => return respond(&mut stream, 400, "text/plain", "Invalid URL").await,
    };
    if parsed.path() != CALLBACK_PATH {
        return respond(&mut stream, 404, "text/plain", "Not Found").await;
    }

    if parsed.query_pairs().next().is_none() {
        debug!("Callback without query, rewriting fragment");
        return respond(&mut stream, 200, "text/html", HTML_REWRITE_FRAGMENT).await;
    }

    let params: QueryParams = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    debug!(has_token = params.contains_key("access_token"), "Received callback query");

    respond(&mut stream, 200, "text/html", HTML_DONE).await?;

    if let Some(sender) = pending.lock().await.take() {
        let _ = sender.send(params);
    }
    Ok(())
}

async fn respond(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &str,
) -> OpenResult<()> {
    stream
        .write_all(http_response(status, content_type, body).as_bytes())
        .await?;
    stream.flush().await?;
    Ok(())
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Unknown",
    };

    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    )
}
