use colored::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::app::ChatApp;
use crate::error::{Result, SimError};
use crate::state::{lock, ChatEvent};
use crate::voice::RecognitionEvent;

/// Largest request head plus body accepted before the connection is dropped.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Interval between SSE comment lines that keep idle proxies from closing `/events`.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

const MAX_HEADERS: usize = 32;

/// Routes the server answers. A known path hit with the wrong method gets 405.
const KNOWN_PATHS: &[&str] = &[
    "/",
    "/events",
    "/state",
    "/clear",
    "/spam/toggle",
    "/category",
    "/speed",
    "/volume",
    "/chat",
    "/recording/toggle",
    "/voice/start",
    "/voice/end",
    "/voice/result",
    "/voice/error",
];

/// Embedded single-page chat client: controls, the scrolling chat pane, the
/// message input and the microphone relay.
pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>chatstorm</title>
<style>
*{margin:0;padding:0;box-sizing:border-box}
body{background:#0d1117;color:#c9d1d9;font-family:'Inter','Segoe UI',sans-serif;height:100vh;display:flex;flex-direction:column}
header{padding:12px 20px;border-bottom:1px solid #21262d;display:flex;align-items:center;justify-content:space-between}
header h1{font-size:1.1rem;color:#a371f7}
#status{font-size:.75rem;color:#8b949e}
.controls{display:flex;gap:10px;padding:10px 20px;flex-wrap:wrap;align-items:end;border-bottom:1px solid #21262d;background:#161b22}
.field{display:flex;flex-direction:column;gap:3px}
.field label{font-size:.7rem;color:#8b949e;text-transform:uppercase;letter-spacing:.5px}
.field select{background:#0d1117;border:1px solid #30363d;color:#c9d1d9;padding:6px 10px;border-radius:6px;font-family:inherit;font-size:.85rem}
.field select:focus{outline:none;border-color:#58a6ff}
.field input[type=range]{accent-color:#a371f7;width:160px}
.btn{border:none;padding:6px 14px;border-radius:6px;font-family:inherit;font-size:.85rem;cursor:pointer;color:#fff}
.btn-go{background:#238636}.btn-go:hover{background:#2ea043}
.btn-go.active{background:#da3633}
.btn-mode{background:#30363d}.btn-mode:hover{background:#484f58}
#chattext{flex:1;overflow-y:auto;padding:10px 16px;font-size:.9rem;line-height:1.6}
.chatMessage{display:flex;gap:6px;padding:2px 0;animation:fadeIn .12s ease-in}
.username{font-weight:bold;white-space:nowrap}
.username::after{content:':'}
.text{word-break:break-word}
.emote{height:1.7em;vertical-align:middle}
.red{color:#f85149}.green{color:#3fb950}.teal{color:#39c5cf}
.blue{color:#58a6ff}.purple{color:#a371f7}.yellow{color:#e3b341}
@keyframes fadeIn{from{opacity:0;transform:translateY(2px)}to{opacity:1;transform:translateY(0)}}
#input{display:flex;gap:6px;padding:8px 16px;border-top:1px solid #21262d;background:#161b22}
#textfield{flex:1;background:#0d1117;border:1px solid #30363d;color:#c9d1d9;padding:6px 10px;border-radius:6px;font-family:inherit;font-size:.9rem}
#textfield:focus{outline:none;border-color:#a371f7}
#voice{padding:6px 20px;border-top:1px solid #21262d;font-size:.8rem;color:#8b949e;display:flex;gap:10px;align-items:center}
#recordingbutton.active{background:#da3633;animation:recPulse 1.1s ease-in-out infinite}
@keyframes recPulse{0%,100%{opacity:1}50%{opacity:.55}}
</style>
</head>
<body>
<header><h1>chatstorm</h1><span id="status">connecting...</span></header>
<div class="controls">
  <button class="btn btn-go" id="spamButton">spam</button>
  <button class="btn btn-mode" id="clearButton">clear</button>
  <div class="field"><label for="selectspamtype">Spam type</label><select id="selectspamtype"></select></div>
  <div class="field"><label for="selectspeed">Speed</label><input type="range" id="selectspeed" min="0" max="100" value="50"></div>
  <button class="btn btn-mode" id="chatButtonToggle">input</button>
</div>
<div id="chattext"></div>
<div id="input"><input type="text" id="textfield" placeholder="Send a message" autocomplete="off"><button class="btn btn-go" id="chatButton">Chat</button></div>
<div id="voice"><button class="btn btn-mode" id="recordingbutton">mic</button><span id="output">[Off]</span></div>
<script>
const chat=document.getElementById('chattext');
const spamButton=document.getElementById('spamButton');
const sel=document.getElementById('selectspamtype');
const speed=document.getElementById('selectspeed');
const field=document.getElementById('textfield');
const recBtn=document.getElementById('recordingbutton');
const output=document.getElementById('output');
const statusEl=document.getElementById('status');

function post(path,body){
  const opts={method:'POST'};
  if(body!==undefined){opts.headers={'Content-Type':'application/x-www-form-urlencoded'};opts.body=body;}
  return fetch(path,opts).catch(err=>console.error('request failed',path,err));
}
function scrollToBottom(){chat.scrollTop=chat.scrollHeight;}
function renderEntry(entry){
  const row=document.createElement('div');
  row.className='chatMessage';
  row.dataset.id=entry.id;
  const name=document.createElement('div');
  name.className='username '+entry.color;
  name.textContent=entry.username;
  const text=document.createElement('div');
  text.className='text';
  text.innerHTML=entry.html;
  row.appendChild(name);
  row.appendChild(text);
  return row;
}
function append(entry){chat.appendChild(renderEntry(entry));scrollToBottom();}
function trim(count){for(let i=0;i<count&&chat.firstChild;i++){chat.removeChild(chat.firstChild);}}
function applySpam(spam){
  spamButton.textContent=spam.enabled?'stop spamming':'spam';
  spamButton.classList.toggle('active',spam.enabled);
  if(sel.value!==spam.category)sel.value=spam.category;
  if(document.activeElement!==speed)speed.value=spam.speed;
}
function applyVoice(voice){
  recBtn.classList.toggle('active',voice.recording);
  output.textContent=voice.output;
  if(voice.recording){startListening();}else{stopListening();}
}

// microphone level meter: while recording, loudness drives the speed slider
const VOLUME_INTERVAL_MS=500;
const VOLUME_GAIN=4;
let meter=null;
let meterPending=false;
async function startListening(){
  if(meter||meterPending||!navigator.mediaDevices)return;
  meterPending=true;
  try{
    const media=await navigator.mediaDevices.getUserMedia({audio:true});
    const ctx=new (window.AudioContext||window.webkitAudioContext)();
    const analyser=ctx.createAnalyser();
    analyser.fftSize=1024;
    ctx.createMediaStreamSource(media).connect(analyser);
    const samples=new Float32Array(analyser.fftSize);
    const timer=setInterval(()=>{
      analyser.getFloatTimeDomainData(samples);
      let sum=0;
      for(const v of samples)sum+=v*v;
      const level=Math.min(1,Math.sqrt(sum/samples.length)*VOLUME_GAIN);
      post('/volume?level='+level.toFixed(2));
    },VOLUME_INTERVAL_MS);
    meter={media,ctx,timer};
  }catch(err){console.error('volume meter unavailable',err);}
  finally{meterPending=false;}
}
function stopListening(){
  if(!meter)return;
  clearInterval(meter.timer);
  meter.media.getTracks().forEach(t=>t.stop());
  meter.ctx.close();
  meter=null;
}
function applySnapshot(s){
  sel.innerHTML='';
  for(const c of s.categories){const o=document.createElement('option');o.value=c;o.textContent=c;sel.appendChild(o);}
  chat.innerHTML='';
  for(const e of s.entries)chat.appendChild(renderEntry(e));
  scrollToBottom();
  applySpam(s.spam);
  applyVoice(s.voice);
}

const Recognition=window.SpeechRecognition||window.webkitSpeechRecognition;
let recognition=null;
if(Recognition){
  recognition=new Recognition();
  recognition.continuous=true;
  recognition.onstart=()=>post('/voice/start');
  recognition.onend=()=>post('/voice/end');
  recognition.onerror=e=>{console.error('Speech recognition error detected: '+e.error);post('/voice/error?error='+encodeURIComponent(e.error));};
  recognition.onresult=e=>{
    const last=e.results[e.results.length-1];
    post('/voice/result','text='+encodeURIComponent(last[0].transcript));
  };
}
function recognizer(command){
  if(!recognition){post('/voice/error?error=unsupported');return;}
  try{if(command==='start'){recognition.start();}else{recognition.stop();}}
  catch(err){post('/voice/error?error='+encodeURIComponent(err.message));}
}

function connect(){
  const es=new EventSource('/events');
  es.onopen=()=>{statusEl.textContent='live';};
  es.onerror=()=>{statusEl.textContent='reconnecting...';};
  es.onmessage=m=>{
    const ev=JSON.parse(m.data);
    switch(ev.type){
      case 'snapshot':applySnapshot(ev.snapshot);break;
      case 'append':append(ev.entry);break;
      case 'trim':trim(ev.count);break;
      case 'clear':chat.innerHTML='';break;
      case 'spam':applySpam(ev.spam);break;
      case 'voice':applyVoice(ev.voice);break;
      case 'recognizer':recognizer(ev.command);break;
    }
  };
}

function sendChat(){
  const text=field.value;
  if(text!=='')post('/chat','text='+encodeURIComponent(text));
  field.value='';
}
document.getElementById('clearButton').onclick=()=>post('/clear');
spamButton.onclick=()=>post('/spam/toggle');
sel.onchange=()=>post('/category?name='+encodeURIComponent(sel.value));
speed.onchange=()=>post('/speed?value='+speed.value);
field.addEventListener('keyup',e=>{if(e.key==='Enter')sendChat();});
document.getElementById('chatButton').onclick=sendChat;
document.getElementById('chatButtonToggle').onclick=()=>{
  const box=document.getElementById('input');
  box.style.display=box.style.display==='none'?'flex':'none';
};
recBtn.onclick=()=>post('/recording/toggle');
connect();
</script>
</body>
</html>"##;

/// Simple percent-decoding for URL query parameters and form bodies.
///
/// Decoded bytes are reassembled as UTF-8; malformed escapes are dropped.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = s.get(i + 1..i + 3).unwrap_or("");
                if hex.len() == 2 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    if let Ok(byte) = u8::from_str_radix(hex, 16) {
                        out.push(byte);
                    }
                }
                i += 1 + hex.len();
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

/// A fully buffered HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Query parameters merged with an urlencoded form body; body wins on clashes.
    pub fn params(&self) -> HashMap<String, String> {
        let mut params = parse_query(&self.query);
        let is_form = self
            .content_type
            .as_deref()
            .map_or(true, |ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form && !self.body.is_empty() {
            params.extend(parse_query(&String::from_utf8_lossy(&self.body)));
        }
        params
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    Complete(HttpRequest),
    /// More bytes are needed.
    Partial,
}

/// Parse a request out of `buf`. Returns `Partial` until the head and the
/// whole `Content-Length` body are present.
pub fn parse_request(buf: &[u8]) -> Result<Parsed> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(Parsed::Partial),
        Err(e) => return Err(SimError::BadRequest(e.to_string())),
    };

    let method = req.method.unwrap_or("GET").to_string();
    let target = req.path.unwrap_or("/");
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.to_string(), String::new()),
    };

    let mut content_length = 0usize;
    let mut content_type = None;
    for header in req.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| SimError::BadRequest("invalid content-length".into()))?;
        } else if header.name.eq_ignore_ascii_case("content-type") {
            content_type = Some(String::from_utf8_lossy(header.value).trim().to_ascii_lowercase());
        }
    }

    let total = head_len
        .checked_add(content_length)
        .filter(|total| *total <= MAX_REQUEST_BYTES)
        .ok_or_else(|| SimError::BadRequest("request too large".into()))?;
    if buf.len() < total {
        return Ok(Parsed::Partial);
    }

    Ok(Parsed::Complete(HttpRequest {
        method,
        path,
        query,
        content_type,
        body: buf[head_len..total].to_vec(),
    }))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(200, "application/json", body),
            Err(e) => Self::text(500, &e.to_string()),
        }
    }

    pub fn text(status: u16, message: &str) -> Self {
        Self::new(status, "text/plain; charset=utf-8", message)
    }

    pub fn no_content() -> Self {
        Self::new(204, "text/plain; charset=utf-8", Vec::new())
    }

    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        Self::text(400, &message.to_string())
    }

    pub fn not_found() -> Self {
        Self::text(404, "not found")
    }

    /// Serialize status line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            reason(self.status),
            self.content_type,
            self.body.len(),
        );
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Answer every route except `/events` and `/emotes/*`, which need the socket
/// or the filesystem.
pub fn route(app: &ChatApp, req: &HttpRequest) -> Response {
    let params = req.params();
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/") => Response::html(INDEX_HTML),
        ("GET", "/state") => Response::json(&app.snapshot()),
        ("POST", "/clear") => {
            app.clear();
            Response::no_content()
        }
        ("POST", "/spam/toggle") => {
            let enabled = app.toggle_spam();
            Response::json(&serde_json::json!({ "enabled": enabled }))
        }
        ("POST", "/category") => match params.get("name") {
            Some(name) => match app.set_category(name) {
                Ok(()) => Response::no_content(),
                Err(e) => Response::bad_request(e),
            },
            None => Response::bad_request("missing 'name'"),
        },
        ("POST", "/speed") => {
            let value = params.get("value").map(|v| v.trim().parse::<i64>());
            match value {
                Some(Ok(value)) => match app.set_speed(value) {
                    Ok(bound_ms) => Response::json(&serde_json::json!({ "bound_ms": bound_ms })),
                    Err(e) => Response::bad_request(e),
                },
                Some(Err(_)) => Response::bad_request("speed must be an integer"),
                None => Response::bad_request("missing 'value'"),
            }
        }
        ("POST", "/volume") => {
            let level = params.get("level").map(|v| v.trim().parse::<f64>());
            match level {
                Some(Ok(level)) => match app.set_volume(level) {
                    Ok(bound_ms) => Response::json(&serde_json::json!({ "bound_ms": bound_ms })),
                    Err(e) => Response::bad_request(e),
                },
                Some(Err(_)) => Response::bad_request("level must be a number"),
                None => Response::bad_request("missing 'level'"),
            }
        }
        ("POST", "/chat") => {
            let text = params.get("text").map(String::as_str).unwrap_or("");
            let posted = app.submit_text(text).is_some();
            Response::json(&serde_json::json!({ "posted": posted }))
        }
        ("POST", "/recording/toggle") => match app.toggle_recording() {
            Ok(recording) => Response::json(&serde_json::json!({ "recording": recording })),
            Err(e) => Response::text(503, &e.to_string()),
        },
        ("POST", "/voice/start") => {
            app.push_voice_event(RecognitionEvent::Start);
            Response::no_content()
        }
        ("POST", "/voice/end") => {
            app.push_voice_event(RecognitionEvent::End);
            Response::no_content()
        }
        ("POST", "/voice/result") => match params.get("text") {
            Some(text) => {
                app.push_voice_event(RecognitionEvent::Result {
                    transcripts: vec![text.clone()],
                });
                Response::no_content()
            }
            None => Response::bad_request("missing 'text'"),
        },
        ("POST", "/voice/error") => {
            let error = params
                .get("error")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            app.push_voice_event(RecognitionEvent::Error(error));
            Response::no_content()
        }
        (_, path) if KNOWN_PATHS.contains(&path) => Response::text(405, "method not allowed"),
        _ => Response::not_found(),
    }
}

/// Accept only plain file names: no separators, no parent references.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

async fn serve_emote(dir: Option<&Path>, name: &str) -> Response {
    let Some(dir) = dir else {
        return Response::not_found();
    };
    if !is_safe_file_name(name) {
        return Response::bad_request("bad emote name");
    }
    match tokio::fs::read(dir.join(name)).await {
        Ok(bytes) => Response::new(200, content_type_for(name), bytes),
        Err(e) => {
            debug!(file = name, error = %e, "emote not served");
            Response::not_found()
        }
    }
}

/// Server settings a caller picks at startup.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    pub port: u16,
    pub open_browser: bool,
    pub emote_dir: Option<PathBuf>,
}

/// Start the web UI server and optionally open the browser.
pub async fn serve(app: Arc<ChatApp>, options: ServeOptions) -> Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", options.port)).await?;
    let port = listener.local_addr()?.port();
    let url = format!("http://localhost:{}", port);

    eprintln!("{}", format!("  Chat running at {}", url).bright_green());
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    if options.open_browser {
        open_browser(&url);
    }

    serve_listener(listener, app, options.emote_dir).await
}

/// Run the accept loop on an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    app: Arc<ChatApp>,
    emote_dir: Option<PathBuf>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "web server listening");
    let emote_dir = emote_dir.map(Arc::new);
    loop {
        let (stream, peer) = listener.accept().await?;
        let app = app.clone();
        let emote_dir = emote_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &app, emote_dir.as_deref().map(PathBuf::as_path)).await {
                warn!(%peer, error = %e, "connection error");
            }
        });
    }
}

fn open_browser(url: &str) {
    #[cfg(target_os = "windows")]
    {
        let _ = std::process::Command::new("cmd")
            .args(["/C", &format!("start {}", url)])
            .spawn();
    }
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
}

async fn read_request(stream: &mut TcpStream) -> Result<Option<HttpRequest>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Parsed::Complete(req) = parse_request(&buf)? {
            return Ok(Some(req));
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(SimError::BadRequest("request too large".into()));
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    app: &ChatApp,
    emote_dir: Option<&Path>,
) -> Result<()> {
    let req = match read_request(&mut stream).await {
        Ok(Some(req)) => req,
        Ok(None) => return Ok(()),
        Err(SimError::BadRequest(msg)) => {
            stream.write_all(&Response::bad_request(&msg).to_bytes()).await?;
            return Err(SimError::BadRequest(msg));
        }
        Err(e) => return Err(e),
    };
    debug!(method = %req.method, path = %req.path, "request");

    if req.method == "GET" && req.path == "/events" {
        return write_event_stream(&mut stream, app, KEEPALIVE_INTERVAL).await;
    }

    let response = match req.path.strip_prefix("/emotes/") {
        Some(name) if req.method == "GET" => serve_emote(emote_dir, &url_decode(name)).await,
        _ => route(app, &req),
    };
    stream.write_all(&response.to_bytes()).await?;
    Ok(())
}

/// Encode one event as an SSE `data:` frame.
pub fn sse_frame(event: &ChatEvent) -> Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// Serve `/events` on `out`: headers, a snapshot, then every event as it
/// happens. A lagging subscriber gets a fresh snapshot in place of the events
/// it missed, and an idle stream gets a `: keep-alive` comment every
/// `keepalive`. Returns once the client goes away.
pub async fn write_event_stream<W>(stream: &mut W, app: &ChatApp, keepalive: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let headers = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\nAccess-Control-Allow-Origin: *\r\n\r\n";
    stream.write_all(headers.as_bytes()).await?;

    // subscribe and snapshot under one lock so no event falls between them
    let (rx, snapshot) = {
        let sim = lock(app.sim());
        (sim.subscribe(), sim.snapshot())
    };
    stream
        .write_all(sse_frame(&ChatEvent::Snapshot { snapshot })?.as_bytes())
        .await?;

    let mut events = BroadcastStream::new(rx);
    let mut keepalive = tokio::time::interval(keepalive);
    keepalive.tick().await;

    loop {
        let frame = tokio::select! {
            item = events.next() => match item {
                Some(Ok(event)) => sse_frame(&event)?,
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "event subscriber lagged; resending snapshot");
                    sse_frame(&ChatEvent::Snapshot { snapshot: app.snapshot() })?
                }
                None => break,
            },
            _ = keepalive.tick() => ": keep-alive\n\n".to_string(),
        };
        if let Err(e) = stream.write_all(frame.as_bytes()).await {
            debug!(error = %e, "event stream closed");
            break;
        }
    }
    Ok(())
}
