//! Web UI served inline, so no static files are needed.

/// The single-page UI.
pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="theme-color" content="#1a1a2e">
<title>mirror-dl</title>
<style>
:root {
  --bg: #1a1a2e;
  --bg2: #16213e;
  --bg3: #0f3460;
  --fg: #e0e0e0;
  --fg2: #a0a0b0;
  --accent: #e94560;
  --green: #4caf50;
  --red: #ef5350;
  --cyan: #00bcd4;
  --radius: 8px;
}
* { margin: 0; padding: 0; box-sizing: border-box; }
body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', system-ui, sans-serif;
  background: var(--bg);
  color: var(--fg);
  min-height: 100vh;
  display: flex;
  flex-direction: column;
}
.header {
  background: var(--bg2);
  padding: 12px 16px;
  display: flex;
  align-items: center;
  justify-content: space-between;
  border-bottom: 1px solid var(--bg3);
}
.header h1 { font-size: 1.1rem; color: var(--cyan); font-weight: 700; }
.conn { font-size: 0.75rem; color: var(--fg2); }
.conn.down { color: var(--red); }
form {
  padding: 12px 16px;
  background: var(--bg2);
  border-bottom: 1px solid var(--bg3);
  display: flex;
  flex-wrap: wrap;
  gap: 8px;
}
form input {
  flex: 1 1 220px;
  background: var(--bg);
  color: var(--fg);
  border: 1px solid var(--bg3);
  border-radius: var(--radius);
  padding: 12px;
  font-size: 16px;
  outline: none;
}
form input:focus { border-color: var(--cyan); }
button {
  background: var(--accent);
  color: #fff;
  border: none;
  border-radius: var(--radius);
  padding: 12px 20px;
  font-size: 0.9rem;
  font-weight: 600;
  cursor: pointer;
  min-height: 44px;
}
button.secondary { background: var(--bg3); color: var(--fg); }
button:disabled { opacity: 0.5; cursor: default; }
.progress-section { padding: 12px 16px; }
.progress-bar-outer {
  background: var(--bg3);
  border-radius: var(--radius);
  height: 28px;
  overflow: hidden;
  position: relative;
}
#progressBar {
  background: var(--green);
  height: 100%;
  width: 0;
  transition: width 0.3s ease;
}
#progressLabel {
  position: absolute;
  top: 0; left: 0; right: 0; bottom: 0;
  display: flex;
  align-items: center;
  justify-content: center;
  font-size: 0.8rem;
  font-weight: 600;
  text-shadow: 0 1px 2px rgba(0,0,0,0.5);
}
.panes {
  flex: 1;
  display: grid;
  grid-template-columns: 1fr 1fr;
  gap: 12px;
  padding: 0 16px 12px;
  min-height: 0;
}
@media (max-width: 720px) { .panes { grid-template-columns: 1fr; } }
.pane {
  background: var(--bg2);
  border-radius: var(--radius);
  padding: 12px;
  overflow-y: auto;
  max-height: 60vh;
  font-family: ui-monospace, SFMono-Regular, Menlo, monospace;
  font-size: 0.78rem;
  white-space: pre-wrap;
  word-break: break-all;
}
#log p { padding: 2px 0; }
#log p.error { color: var(--red); }
#log p.done { color: var(--green); }
#downloadButton { display: none; margin: 0 16px 16px; background: var(--green); }
</style>
</head>
<body>
<div class="header">
  <h1>mirror-dl</h1>
  <span class="conn" id="conn">Connecting...</span>
</div>

<form id="cloneForm" autocomplete="off">
  <input type="url" id="websiteUrl" placeholder="https://example.com/" required>
  <input type="text" id="directoryName" placeholder="Directory name" pattern="[A-Za-z0-9][A-Za-z0-9._\-]*" required>
  <button type="submit">Download</button>
  <button type="button" class="secondary" id="cancelButton" disabled>Cancel</button>
</form>

<div class="progress-section">
  <div class="progress-bar-outer">
    <div id="progressBar"></div>
    <div id="progressLabel"></div>
  </div>
</div>

<button id="downloadButton">Download archive</button>

<div class="panes">
  <div class="pane" id="log"></div>
  <div class="pane" id="directoryTree"></div>
</div>

<script src="/script.js"></script>
</body>
</html>
"##;

/// Client for the realtime channel.
pub const SCRIPT_JS: &str = r#"document.addEventListener('DOMContentLoaded', () => {
  'use strict';

  const form = document.getElementById('cloneForm');
  const log = document.getElementById('log');
  const progressBar = document.getElementById('progressBar');
  const progressLabel = document.getElementById('progressLabel');
  const downloadButton = document.getElementById('downloadButton');
  const cancelButton = document.getElementById('cancelButton');
  const directoryTree = document.getElementById('directoryTree');
  const conn = document.getElementById('conn');

  let socket = null;
  let reconnectTimer = null;
  let current = null;

  const handlers = {
    log(message) {
      const entry = document.createElement('p');
      entry.textContent = message;
      if (message.startsWith('[Error]')) {
        entry.className = 'error';
        cancelButton.disabled = true;
      } else if (message.startsWith('[+]')) {
        entry.className = 'done';
      }
      log.appendChild(entry);
      log.scrollTop = log.scrollHeight;
    },
    progress({ current, total }) {
      const percentage = total > 0 ? Math.min(100, (current / total) * 100) : 0;
      progressBar.style.width = `${percentage}%`;
      progressLabel.textContent = `${current} / ${total}`;
    },
    directoryTree(tree) {
      directoryTree.textContent = tree;
    },
    downloadReady(downloadPath) {
      cancelButton.disabled = true;
      downloadButton.style.display = 'block';
      downloadButton.onclick = () => {
        window.location.href = downloadPath;
      };
    },
  };

  function send(event, data) {
    if (!socket || socket.readyState !== WebSocket.OPEN) {
      handlers.log('[Error] Not connected to the server.');
      return;
    }
    socket.send(JSON.stringify({ event, data }));
  }

  function connect() {
    const scheme = window.location.protocol === 'https:' ? 'wss' : 'ws';
    socket = new WebSocket(`${scheme}://${window.location.host}/ws`);
    socket.onopen = () => {
      conn.textContent = 'Connected';
      conn.classList.remove('down');
    };
    socket.onmessage = (e) => {
      try {
        const { event, data } = JSON.parse(e.data);
        if (handlers[event]) handlers[event](data);
      } catch (err) {
        console.error('Bad frame', err);
      }
    };
    socket.onclose = () => {
      conn.textContent = 'Disconnected';
      conn.classList.add('down');
      cancelButton.disabled = true;
      clearTimeout(reconnectTimer);
      reconnectTimer = setTimeout(connect, 3000);
    };
  }

  form.addEventListener('submit', (e) => {
    e.preventDefault();
    log.innerHTML = '';
    progressBar.style.width = '0';
    progressLabel.textContent = '';
    downloadButton.style.display = 'none';
    directoryTree.textContent = '';
    const websiteUrl = document.getElementById('websiteUrl').value.trim();
    const directoryName = document.getElementById('directoryName').value.trim();
    current = directoryName;
    cancelButton.disabled = false;
    send('startDownload', { websiteUrl, directoryName });
  });

  cancelButton.addEventListener('click', () => {
    if (current) send('cancelDownload', { directoryName: current });
  });

  connect();
});
"#;
