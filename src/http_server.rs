use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Form, State};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::dns::{DNSPacket, RecordType};
use crate::resolver::DnsResolver;

const LOOKUP_PAGE: &str = r#"<html lang="en">
<head>
<meta http-equiv="Content-Type" content="text/html; charset=UTF-8">
<title>HTTP(s) DNS lookup</title>
<script language="JavaScript">
function resolveName() {
    var type = 255;
    var types = document.getElementsByName('type');
    for (var i = 0; i < types.length; i++) {
        if (types[i].checked) { type = types[i].value; }
    }
    var name = document.getElementById('name').value;
    var xhr = new XMLHttpRequest();
    xhr.open('POST', '/', true);
    xhr.setRequestHeader('Content-type', 'application/x-www-form-urlencoded');
    xhr.responseType = 'json';
    xhr.onload = function () {
        if (xhr.status == 200) {
            document.getElementById('json').innerHTML = JSON.stringify(xhr.response, undefined, 2);
        } else {
            alert('Something went wrong: ' + xhr.status);
        }
    };
    xhr.send('name=' + name + '&type=' + type);
}
</script>
</head>
<body>
<form>
<div>
    <span>DNS Lookup</span>
    <span><input type="text" id="name" style="width:200px;"></span>
    <span><input type="button" value="Resolve" onclick="resolveName()"></span>
</div>
<div>
    <label><input type="radio" name="type" value="1"> A </label>
    <label><input type="radio" name="type" value="28"> AAAA </label>
    <label><input type="radio" name="type" value="5"> CNAME </label>
    <label><input type="radio" name="type" value="15"> MX </label>
    <label><input type="radio" name="type" value="2"> NS </label>
    <label><input type="radio" name="type" value="12"> PTR </label>
    <label><input type="radio" name="type" value="16"> TXT </label>
    <label><input type="radio" name="type" value="255" checked> ANY </label>
</div>
</form>
<br/>
<pre id="json"></pre>
</body>
</html>
"#;

/// JSON lookup endpoint over the same resolver the wire listeners use.
pub struct HttpServer {
    resolver: Arc<DnsResolver>,
    bind_addr: SocketAddr,
}

#[derive(Clone)]
struct AppState {
    resolver: Arc<DnsResolver>,
}

#[derive(serde::Deserialize)]
struct LookupForm {
    name: String,
    /// Numeric record type; anything unparsable falls back to ANY.
    #[serde(rename = "type")]
    qtype: Option<String>,
}

impl HttpServer {
    pub fn new(resolver: Arc<DnsResolver>, bind_addr: SocketAddr) -> Self {
        Self {
            resolver,
            bind_addr,
        }
    }

    pub async fn start(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = Router::new()
            .route("/", get(lookup_page).post(resolve_name))
            .with_state(AppState {
                resolver: self.resolver,
            });

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        info!("HTTP DNS server listening on {}", self.bind_addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP server shutdown complete");
        })
        .await?;

        Ok(())
    }
}

async fn lookup_page() -> impl IntoResponse {
    Html(LOOKUP_PAGE)
}

async fn resolve_name(
    State(state): State<AppState>,
    ConnectInfo(src_addr): ConnectInfo<SocketAddr>,
    Form(form): Form<LookupForm>,
) -> impl IntoResponse {
    let qtype_value = form
        .qtype
        .as_deref()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(255);
    let qtype = RecordType::from(qtype_value);

    let query = DNSPacket::query(rand::rng().random(), &form.name, qtype);
    debug!("http lookup from {}: {} {}", src_addr, form.name, qtype);

    match state.resolver.query(&src_addr.to_string(), &query).await {
        Ok(answer) => {
            let records: Vec<_> = answer
                .answers
                .iter()
                .map(|record| {
                    json!({
                        "name": record.name(),
                        "type": record.rtype.to_string(),
                        "ttl": record.ttl,
                        "data": record.rdata_text(),
                    })
                })
                .collect();

            Json(json!({
                "Answer": records,
                "Name": form.name,
                "Type": qtype.to_string(),
                "Code": answer.header.rcode,
            }))
            .into_response()
        }
        Err(err) => Json(json!({
            "code": 1002,
            "message": format!("query failed, {}", err),
        }))
        .into_response(),
    }
}
