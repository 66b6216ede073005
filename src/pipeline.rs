use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SplitStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument as _};

use crate::filter::{Outcome, ScrubFilter};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub processed: u64,
    pub matched: u64,
    /// Lines written through untouched because they are not UTF-8 JSON objects.
    pub passed_through: u64,
}

/// Filters newline-delimited JSON events from `reader` into `writer`, until
/// the end of input or until `shutdown_token` is cancelled.
///
/// Every input line produces exactly one output line, in order. Lines that
/// cannot be filtered are written back byte for byte.
pub fn run<R, W>(
    filter: Arc<ScrubFilter>,
    reader: R,
    mut writer: W,
    shutdown_token: CancellationToken,
) -> JoinHandle<std::io::Result<Stats>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = SplitStream::new(BufReader::new(reader).split(b'\n'))
        .take_until(shutdown_token.cancelled_owned())
        .boxed();

    tokio::spawn(
        async move {
            info!(status = "started", field = filter.field());
            let mut stats = Stats::default();

            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        error!(kind = "reading input", %err);
                        return Err(err);
                    }
                };
                let output = filter_line(&filter, line, &mut stats);
                writer.write_all(&output).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }

            info!(
                status = "terminating",
                stats.processed, stats.matched, stats.passed_through
            );
            Ok(stats)
        }
        .instrument(info_span!("pipeline")),
    )
}

fn filter_line(filter: &ScrubFilter, line: Vec<u8>, stats: &mut Stats) -> Vec<u8> {
    stats.processed += 1;

    let line = match String::from_utf8(line) {
        Ok(line) => line,
        Err(err) => {
            warn!(
                kind = "event is not valid UTF-8",
                msg = "passing through",
                err = %err.utf8_error()
            );
            stats.passed_through += 1;
            return err.into_bytes();
        }
    };

    let mut event = match serde_json::from_str::<Value>(&line) {
        Ok(Value::Object(event)) => event,
        Ok(_) => {
            warn!(kind = "event is not a JSON object", msg = "passing through");
            stats.passed_through += 1;
            return line.into_bytes();
        }
        Err(err) => {
            warn!(kind = "unparseable event", msg = "passing through", %err);
            stats.passed_through += 1;
            return line.into_bytes();
        }
    };

    if filter.process(&mut event) != Outcome::Matched {
        return line.into_bytes();
    }
    stats.matched += 1;
    match serde_json::to_vec(&event) {
        Ok(output) => output,
        Err(err) => {
            error!(kind = "serializing event", %err);
            line.into_bytes()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::config::Config;

    use super::*;

    fn filter(dir: &TempDir) -> Arc<ScrubFilter> {
        let path = dir.path().join("dict.yml");
        fs::write(&path, "\"100\": Continue\nmerci: gracias\n").unwrap();
        let mut config = Config::new("message", path);
        config.add_tag = vec!["scrubbed".into()];
        Arc::new(ScrubFilter::configure(&config).unwrap())
    }

    #[tokio::test]
    async fn filters_events() {
        let dir = TempDir::new().unwrap();
        let input = concat!(
            r#"{"message":"merci for code 100"}"#,
            "\n",
            r#"{"message":"hello"}"#,
            "\n",
            r#"{"host":"a"}"#,
            "\n",
        );
        let (client, mut server) = tokio::io::duplex(1024);

        let stats = run(filter(&dir), input.as_bytes(), client, CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut output)
            .await
            .unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                serde_json::json!({"message": "gracias for code Continue", "tags": ["scrubbed"]}),
                serde_json::json!({"message": "hello"}),
                serde_json::json!({"host": "a"}),
            ]
        );
        assert_eq!(
            stats,
            Stats {
                processed: 3,
                matched: 1,
                passed_through: 0,
            }
        );
    }

    #[tokio::test]
    async fn passes_through_invalid_lines() {
        let dir = TempDir::new().unwrap();
        let input = "not json merci\n[\"merci\"]\n";
        let (client, mut server) = tokio::io::duplex(1024);

        let stats = run(filter(&dir), input.as_bytes(), client, CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut output)
            .await
            .unwrap();
        assert_eq!(output, input);
        assert_eq!(stats.passed_through, 2);
        assert_eq!(stats.matched, 0);
    }

    #[tokio::test]
    async fn invalid_utf8_line_passed_through() {
        let dir = TempDir::new().unwrap();
        let input: &[u8] = b"{\"message\":\"a\xff\"}\n{\"message\":\"merci\"}\n";
        let (client, mut server) = tokio::io::duplex(1024);

        let stats = run(filter(&dir), input, client, CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        let mut output = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut output)
            .await
            .unwrap();
        let expected: &[u8] =
            b"{\"message\":\"a\xff\"}\n{\"message\":\"gracias\",\"tags\":[\"scrubbed\"]}\n";
        assert_eq!(output, expected);
        assert_eq!(
            stats,
            Stats {
                processed: 2,
                matched: 1,
                passed_through: 1,
            }
        );
    }

    #[tokio::test]
    async fn keeps_field_order() {
        let dir = TempDir::new().unwrap();
        let input = "{\"message\":\"merci\",\"host\":\"a\"}\n";
        let (client, mut server) = tokio::io::duplex(1024);

        run(filter(&dir), input.as_bytes(), client, CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut output)
            .await
            .unwrap();
        assert_eq!(
            output,
            "{\"message\":\"gracias\",\"host\":\"a\",\"tags\":[\"scrubbed\"]}\n"
        );
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (_input_tx, input_rx) = tokio::io::duplex(64);
        let shutdown_token = CancellationToken::new();

        let task = run(filter(&dir), input_rx, tokio::io::sink(), shutdown_token.clone());
        shutdown_token.cancel();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats, Stats::default());
    }
}
