//! UI route handler for the axum channel — the embedded chat page.
//!
//! The page is static HTML with vanilla JS: it POSTs to `/api/chat`, threads
//! the returned `session_id` through follow-up messages, renders sources and
//! confidence, and shows store statistics from `/api/stats`.

use axum::response::Html;

const CHAT_PAGE_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Samara</title>
  <style>
    *, *::before, *::after { box-sizing: border-box; margin: 0; padding: 0; }
    body {
      font-family: system-ui, -apple-system, sans-serif;
      background: #0f0f0f; color: #e0e0e0;
      display: flex; flex-direction: column; height: 100vh;
    }
    header {
      padding: 0.75rem 1.25rem; border-bottom: 1px solid #333;
      display: flex; align-items: baseline; gap: 1rem;
    }
    header h1 { font-size: 1.1rem; }
    header #stats { font-size: 0.8rem; color: #888; }
    #log {
      flex: 1; overflow-y: auto; padding: 1rem 1.25rem;
      display: flex; flex-direction: column; gap: 0.75rem;
    }
    .msg { max-width: 46rem; padding: 0.6rem 0.9rem; border-radius: 10px; white-space: pre-wrap; }
    .msg.user { align-self: flex-end; background: #2a2a3a; }
    .msg.bot  { align-self: flex-start; background: #1a1a1a; border: 1px solid #2a2a2a; }
    .msg .meta { margin-top: 0.4rem; font-size: 0.75rem; color: #888; }
    .msg .src  { margin-top: 0.3rem; font-size: 0.75rem; color: #9a9ac0; }
    form {
      display: flex; gap: 0.5rem; padding: 0.75rem 1.25rem;
      border-top: 1px solid #333;
    }
    select, input[type=text] {
      background: #1a1a1a; color: #e0e0e0; border: 1px solid #333;
      border-radius: 8px; padding: 0.5rem 0.75rem; font-size: 0.9rem;
    }
    input[type=text] { flex: 1; }
    button {
      background: #2a2a3a; color: #c0c0e0; border: none; border-radius: 8px;
      padding: 0.5rem 1.25rem; cursor: pointer; font-size: 0.9rem;
    }
    button:hover { background: #3a3a5a; }
    button:disabled { opacity: 0.5; cursor: default; }
  </style>
</head>
<body>
  <header>
    <h1>Samara</h1>
    <span id="stats">loading…</span>
  </header>
  <div id="log"></div>
  <form id="chat-form">
    <select id="mode">
      <option value="chat" selected>chat</option>
      <option value="thinking">thinking</option>
    </select>
    <input id="message" type="text" placeholder="Ask about your documents…" autocomplete="off" autofocus />
    <button id="send" type="submit">Send</button>
  </form>
  <script>
    const log = document.getElementById('log');
    const form = document.getElementById('chat-form');
    const input = document.getElementById('message');
    const send = document.getElementById('send');
    let sessionId = null;

    function addMessage(cls, text) {
      const div = document.createElement('div');
      div.className = 'msg ' + cls;
      div.textContent = text;
      log.appendChild(div);
      log.scrollTop = log.scrollHeight;
      return div;
    }

    async function refreshStats() {
      try {
        const r = await fetch('/api/stats');
        const s = await r.json();
        document.getElementById('stats').textContent =
          s.total_documents + ' documents · ' + s.total_chunks + ' chunks';
      } catch (e) {
        document.getElementById('stats').textContent = 'stats unavailable';
      }
    }

    form.addEventListener('submit', async (ev) => {
      ev.preventDefault();
      const message = input.value.trim();
      if (!message) return;
      input.value = '';
      send.disabled = true;
      addMessage('user', message);

      try {
        const r = await fetch('/api/chat', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({
            message,
            session_id: sessionId,
            mode: document.getElementById('mode').value,
          }),
        });
        const body = await r.json();
        if (!r.ok) {
          addMessage('bot', 'Error: ' + (body.message || r.statusText));
          return;
        }
        sessionId = body.session_id;
        const div = addMessage('bot', body.response);

        const meta = document.createElement('div');
        meta.className = 'meta';
        meta.textContent = 'confidence ' + Math.round(body.confidence * 100) + '% · '
          + body.processing_time.toFixed(2) + 's';
        div.appendChild(meta);

        for (const src of body.sources || []) {
          const s = document.createElement('div');
          s.className = 'src';
          s.textContent = '📄 ' + src.document_title + ' (page ' + src.page + ', score ' + src.score + ')';
          div.appendChild(s);
        }
      } catch (e) {
        addMessage('bot', 'Request failed: ' + e);
      } finally {
        send.disabled = false;
        input.focus();
      }
    });

    refreshStats();
  </script>
</body>
</html>
"#;

/// GET / — the chat page.
pub(super) async fn chat_page() -> Html<&'static str> {
    Html(CHAT_PAGE_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_posts_to_chat_api() {
        assert!(CHAT_PAGE_HTML.contains("/api/chat"));
        assert!(CHAT_PAGE_HTML.contains("session_id"));
    }
}
