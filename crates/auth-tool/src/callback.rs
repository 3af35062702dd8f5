//! Loopback listener that receives the redirect return from the browser.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Where the provider sends the browser back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub addr: String,
    pub path: String,
}

impl RedirectTarget {
    /// Split an `http://host[:port]/path` redirect URI into a bind address
    /// and the path to wait on.
    pub fn parse(redirect_uri: &str) -> anyhow::Result<Self> {
        let Some(rest) = redirect_uri.strip_prefix("http://") else {
            bail!(
                "Cannot listen on '{}': only http:// redirect URIs are served locally (use --no-listen)",
                redirect_uri
            );
        };

        let (authority, path) = match rest.find(|c: char| c == '/' || c == '?' || c == '#') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or("/");
        let path = if path.is_empty() { "/" } else { path };

        if authority.is_empty() {
            bail!("Redirect URI '{}' has no host", redirect_uri);
        }
        let has_port = match authority.rfind(':') {
            Some(idx) => !authority[idx..].contains(']'),
            None => false,
        };
        let addr = if has_port {
            authority.to_string()
        } else {
            format!("{}:80", authority)
        };

        Ok(Self {
            addr,
            path: path.to_string(),
        })
    }
}

/// A request for the redirect path. The browser is kept waiting until
/// [`Return::respond`] is called.
pub struct Return {
    pub query: Option<String>,
    socket: TcpStream,
}

impl Return {
    pub async fn respond(mut self, ok: bool, message: &str) -> anyhow::Result<()> {
        let status = if ok { "200 OK" } else { "400 Bad Request" };
        send_response(&mut self.socket, status, result_html(message))
            .await
            .context("Failed to answer the browser")
    }
}

pub async fn bind(target: &RedirectTarget) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(&target.addr)
        .await
        .with_context(|| format!("Failed to bind callback listener on {}", target.addr))?;
    info!("Callback listener waiting on http://{}{}", target.addr, target.path);
    Ok(listener)
}

/// How long a single connection may take to send its request line.
const REQUEST_LINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept connections until one asks for `path`. Each connection is read on
/// its own task, so an idle preconnect socket cannot hold up the real
/// return. Other paths (favicon and the like) get a 404.
pub async fn wait_for_return(
    listener: &TcpListener,
    path: &str,
    limit: Option<Duration>,
) -> anyhow::Result<Return> {
    let (tx, mut rx) = mpsc::channel::<Return>(1);

    let accept = async {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let tx = tx.clone();
                        let path = path.to_string();
                        tokio::spawn(async move {
                            if let Some(ret) = read_request(socket, peer, &path).await {
                                let _ = tx.send(ret).await;
                            }
                        });
                    }
                    Err(e) => debug!("Accept failed: {}", e),
                },
                Some(ret) = rx.recv() => return ret,
            }
        }
    };

    match limit {
        Some(limit) => timeout(limit, accept)
            .await
            .map_err(|_| anyhow!("No redirect return within {} seconds", limit.as_secs())),
        None => Ok(accept.await),
    }
}

/// Read one request line. `None` for anything that is not the redirect
/// return; per-connection failures never end the wait.
async fn read_request(mut socket: TcpStream, peer: SocketAddr, path: &str) -> Option<Return> {
    let mut reader = BufReader::new(&mut socket);
    let mut request_line = String::new();
    match timeout(REQUEST_LINE_TIMEOUT, reader.read_line(&mut request_line)).await {
        Ok(Ok(n)) if n > 0 => {}
        Ok(Ok(_)) => {
            debug!("{} closed without sending a request", peer);
            return None;
        }
        Ok(Err(e)) => {
            debug!("Failed to read request from {}: {}", peer, e);
            return None;
        }
        Err(_) => {
            debug!("No request from {} within {}s", peer, REQUEST_LINE_TIMEOUT.as_secs());
            return None;
        }
    }

    // "GET /path?query HTTP/1.1"
    let target = request_line.split_whitespace().nth(1)?;
    let (request_path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (target, None),
    };

    if request_path != path {
        debug!("Ignoring request for {} from {}", request_path, peer);
        if let Err(e) = send_response(&mut socket, "404 Not Found", result_html("Not found")).await {
            debug!("Failed to answer {}: {}", peer, e);
        }
        return None;
    }

    info!("Redirect return received from {}", peer);
    Some(Return { query, socket })
}

/// Send HTTP response to the browser
async fn send_response(socket: &mut TcpStream, status: &str, html: String) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        html.len(),
        html
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    if let Err(e) = socket.shutdown().await {
        warn!("Failed to close browser connection: {}", e);
    }
    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn result_html(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>auth-tool</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f4f5f7;
        }}
        .container {{
            background: white;
            padding: 2rem;
            border-radius: 8px;
            box-shadow: 0 4px 20px rgba(0,0,0,0.1);
            text-align: center;
            max-width: 480px;
        }}
        p {{
            color: #444;
            line-height: 1.6;
        }}
    </style>
</head>
<body>
    <div class="container">
        <h1>auth-tool</h1>
        <p>{}</p>
        <p>Return to the terminal to continue.</p>
    </div>
</body>
</html>"#,
        escape_html(message)
    )
}
