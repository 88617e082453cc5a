//! Streaming reply assembly.
//!
//! [`StreamAssembler`] consumes a response body chunk by chunk, extracts the
//! content fragments with the backend's [`FrameParser`], and keeps the
//! running reply text. A caller-supplied publish callback receives the full
//! text after every fragment so a view can redraw partial output.

use std::pin::pin;

use futures_util::{Stream, StreamExt};
use tracing::debug;

use super::Provider;
use super::framing::{Frame, FrameParser, LineBuffer};

/// Final text of a stream that produced no content at all.
pub const NO_RESPONSE_FALLBACK: &str = "No response received";

/// Accumulates reply text from a line-framed byte stream.
///
/// Once finished (by [`finish`](Self::finish) or a failed
/// [`drain`](Self::drain)) further input is ignored and the text no longer
/// changes.
///
/// # Examples
///
/// ```
/// use relaychat::llm::{Provider, StreamAssembler};
///
/// let mut assembler = StreamAssembler::for_provider(Provider::Ollama);
/// let mut seen = Vec::new();
/// assembler.feed(b"{\"message\":{\"content\":\"Hi\"}}\n{\"mess", &mut |text: &str| {
///     seen.push(text.to_owned())
/// });
/// assembler.feed(b"age\":{\"content\":\" there\"}}\n", &mut |text: &str| {
///     seen.push(text.to_owned())
/// });
///
/// assert_eq!(seen, ["Hi", "Hi there"]);
/// assert_eq!(assembler.finish(&mut |_: &str| {}), "Hi there");
/// ```
pub struct StreamAssembler {
    parser: Box<dyn FrameParser>,
    lines: LineBuffer,
    text: String,
    fragments: usize,
    finished: bool,
}

impl StreamAssembler {
    pub fn new(parser: Box<dyn FrameParser>) -> Self {
        Self {
            parser,
            lines: LineBuffer::default(),
            text: String::new(),
            fragments: 0,
            finished: false,
        }
    }

    pub fn for_provider(provider: Provider) -> Self {
        Self::new(provider.frame_parser())
    }

    /// The text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one chunk of the body. `publish` is called with the running text
    /// after each fragment. Returns the number of fragments appended.
    pub fn feed(&mut self, chunk: &[u8], publish: &mut dyn FnMut(&str)) -> usize {
        if self.finished {
            return 0;
        }
        let lines = self.lines.push(chunk);
        self.process(lines, publish)
    }

    fn process(&mut self, lines: Vec<String>, publish: &mut dyn FnMut(&str)) -> usize {
        let mut appended = 0;
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match self.parser.parse_line(&line) {
                Frame::Fragment(fragment) => {
                    self.text.push_str(&fragment);
                    self.fragments += 1;
                    appended += 1;
                    publish(&self.text);
                }
                // Only the rest of this chunk is dropped; later chunks are still read.
                Frame::Done => break,
                Frame::Skip => {}
            }
        }
        appended
    }

    /// Ends the stream: the unterminated last line, if any, is processed and
    /// the final text returned. Calling it again returns the same text.
    pub fn finish(&mut self, publish: &mut dyn FnMut(&str)) -> String {
        if !self.finished {
            if let Some(rest) = self.lines.take_rest() {
                self.process(vec![rest], publish);
            }
            self.finished = true;
            debug!(
                provider = %self.parser.provider(),
                fragments = self.fragments,
                chars = self.text.len(),
                "stream finished"
            );
        }
        self.final_text()
    }

    /// The accumulated text, or [`NO_RESPONSE_FALLBACK`] when there is none.
    pub fn final_text(&self) -> String {
        if self.text.is_empty() {
            NO_RESPONSE_FALLBACK.to_owned()
        } else {
            self.text.clone()
        }
    }

    /// Reads `stream` to its end, feeding every chunk, and returns the final
    /// text.
    ///
    /// # Errors
    ///
    /// The first error yielded by `stream` stops the read loop and is
    /// returned unchanged; the assembler is finished at that point and the
    /// partial text is left as it was.
    pub async fn drain<S, B, E>(&mut self, stream: S, mut publish: impl FnMut(&str)) -> Result<String, E>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
    {
        let mut stream = pin!(stream);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    self.feed(bytes.as_ref(), &mut publish);
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }
        Ok(self.finish(&mut publish))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn openai_line(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    fn ollama_line(content: &str) -> String {
        format!("{}\n", serde_json::json!({ "message": { "content": content } }))
    }

    async fn assemble(provider: Provider, chunks: &[&str]) -> (String, Vec<String>) {
        let mut assembler = StreamAssembler::for_provider(provider);
        let mut published = Vec::new();
        let items: Vec<Result<Vec<u8>, std::io::Error>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        let text = assembler
            .drain(stream::iter(items), |text| published.push(text.to_owned()))
            .await
            .unwrap();
        (text, published)
    }

    /// Every way of cutting `body` into two or three pieces.
    fn splits(body: &str) -> Vec<Vec<String>> {
        let bytes = body.as_bytes();
        let mut out = Vec::new();
        for i in 0..=bytes.len() {
            out.push(vec![
                String::from_utf8_lossy(&bytes[..i]).into_owned(),
                String::from_utf8_lossy(&bytes[i..]).into_owned(),
            ]);
        }
        for i in (0..bytes.len()).step_by(7) {
            for j in (i..=bytes.len()).step_by(5) {
                out.push(vec![
                    String::from_utf8_lossy(&bytes[..i]).into_owned(),
                    String::from_utf8_lossy(&bytes[i..j]).into_owned(),
                    String::from_utf8_lossy(&bytes[j..]).into_owned(),
                ]);
            }
        }
        out
    }

    #[tokio::test]
    async fn openai_scenario() {
        let (text, published) = assemble(
            Provider::OpenAi,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
                "data: [DONE]\n",
            ],
        )
        .await;
        assert_eq!(text, "Hello");
        assert_eq!(published, ["Hel", "Hello"]);
    }

    #[tokio::test]
    async fn ollama_scenario() {
        let (text, _) = assemble(
            Provider::Ollama,
            &["{\"message\":{\"content\":\"Hi\"}}\n{\"message\":{\"content\":\" there\"}}\n"],
        )
        .await;
        assert_eq!(text, "Hi there");
    }

    #[tokio::test]
    async fn line_split_mid_key() {
        let (text, _) = assemble(
            Provider::OpenAi,
            &[
                "data: {\"choices\":[{\"delta\":{\"cont",
                "ent\":\"X\"}}]}\n",
            ],
        )
        .await;
        assert_eq!(text, "X");
    }

    #[tokio::test]
    async fn chunking_does_not_change_openai_text() {
        let fragments = ["The ", "quick ", "brøwn ", "fox"];
        let body: String = fragments
            .iter()
            .map(|f| openai_line(f) + "\n")
            .chain(std::iter::once("data: [DONE]\n\n".to_owned()))
            .collect();

        for chunks in splits(&body) {
            let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let (text, published) = assemble(Provider::OpenAi, &refs).await;
            assert_eq!(text, "The quick brøwn fox", "chunks: {chunks:?}");
            assert_eq!(published.len(), fragments.len());
        }
    }

    #[tokio::test]
    async fn chunking_does_not_change_ollama_text() {
        let fragments = ["a", "bc", "", "def"];
        let body: String = fragments.iter().map(|f| ollama_line(f)).collect();

        for chunks in splits(&body) {
            let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let (text, _) = assemble(Provider::Ollama, &refs).await;
            assert_eq!(text, "abcdef", "chunks: {chunks:?}");
        }
    }

    #[tokio::test]
    async fn multibyte_split_across_chunks() {
        let body = ollama_line("日本");
        let bytes = body.as_bytes();
        // cut inside the first three-byte character
        let cut = body.find('日').unwrap() + 1;
        let items: Vec<Result<&[u8], std::io::Error>> = vec![Ok(&bytes[..cut]), Ok(&bytes[cut..])];

        let mut assembler = StreamAssembler::for_provider(Provider::Ollama);
        let text = assembler.drain(stream::iter(items), |_| {}).await.unwrap();
        assert_eq!(text, "日本");
    }

    #[tokio::test]
    async fn done_stops_only_the_current_chunk() {
        let first = format!("{}data: [DONE]\n{}", openai_line("a"), openai_line("ignored"));
        let second = openai_line("b");
        let (text, _) = assemble(Provider::OpenAi, &[&first, &second]).await;
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let body = format!(
            "{}data: {{broken\n: keep-alive comment\ndata: {{\"choices\":[]}}\n\n{}",
            openai_line("x"),
            openai_line("y")
        );
        let (text, published) = assemble(Provider::OpenAi, &[&body]).await;
        assert_eq!(text, "xy");
        assert_eq!(published, ["x", "xy"]);
    }

    #[tokio::test]
    async fn empty_stream_uses_fallback() {
        let (text, published) = assemble(Provider::OpenAi, &["data: [DONE]\n"]).await;
        assert_eq!(text, NO_RESPONSE_FALLBACK);
        assert!(published.is_empty());

        let (text, _) = assemble(Provider::Ollama, &[]).await;
        assert_eq!(text, NO_RESPONSE_FALLBACK);
    }

    #[tokio::test]
    async fn unterminated_last_line_is_flushed() {
        let body = format!("{}{}", ollama_line("a"), r#"{"message":{"content":"b"}}"#);
        let (text, published) = assemble(Provider::Ollama, &[&body]).await;
        assert_eq!(text, "ab");
        assert_eq!(published, ["a", "ab"]);
    }

    #[tokio::test]
    async fn stream_error_is_returned_and_freezes_text() {
        let items: Vec<Result<Vec<u8>, String>> = vec![
            Ok(ollama_line("partial").into_bytes()),
            Err("connection reset".to_owned()),
            Ok(ollama_line(" never").into_bytes()),
        ];
        let mut assembler = StreamAssembler::for_provider(Provider::Ollama);
        let err = assembler.drain(stream::iter(items), |_| {}).await.unwrap_err();
        assert_eq!(err, "connection reset");
        assert!(assembler.is_finished());
        assert_eq!(assembler.text(), "partial");
    }

    #[test]
    fn finished_assembler_ignores_input() {
        let mut assembler = StreamAssembler::for_provider(Provider::Ollama);
        assembler.feed(ollama_line("done").as_bytes(), &mut |_| {});
        assert_eq!(assembler.finish(&mut |_| {}), "done");

        let mut calls = 0;
        let appended = assembler.feed(ollama_line(" more").as_bytes(), &mut |_| calls += 1);
        assert_eq!(appended, 0);
        assert_eq!(calls, 0);
        assert_eq!(assembler.finish(&mut |_| {}), "done");
        assert_eq!(assembler.fragment_count(), 1);
    }
}
