//! Async byte stream → line callback, shared by child pipes and the SBS socket.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use signalforge_core::{LineSplitter, MAX_LINE_LEN};

const READ_CHUNK: usize = 4096;

/// Read `reader` to EOF, calling `on_line` for every complete line in order.
///
/// An unterminated tail at EOF is delivered as a final line. The callback is
/// awaited before the next read, so line order is preserved. Lines over
/// `MAX_LINE_LEN` bytes are skipped with a warning.
pub(crate) async fn for_each_line<R, F, Fut>(reader: R, on_line: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    for_each_line_capped(reader, MAX_LINE_LEN, on_line).await
}

async fn for_each_line_capped<R, F, Fut>(
    mut reader: R,
    max_len: usize,
    mut on_line: F,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut splitter = LineSplitter::with_max_len(max_len);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let dropped = splitter.dropped();
        for line in splitter.feed(&buf[..n]) {
            on_line(line).await;
        }
        if splitter.dropped() > dropped {
            warn!(max_len, total = splitter.dropped(), "Dropped over-long line");
        }
    }

    if let Some(line) = splitter.finish() {
        on_line(line).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_in_order() {
        let input: &[u8] = b"a\nb\r\nc";
        let mut seen = Vec::new();
        for_each_line(input, |line| {
            seen.push(line);
            std::future::ready(())
        })
        .await
        .unwrap();
        assert_eq!(seen, vec!["a", "b\r", "c"]);
    }

    #[tokio::test]
    async fn test_overlong_line_skipped() {
        let mut input = vec![b'z'; 100];
        input.extend_from_slice(b"\nafter\n");
        let mut seen = Vec::new();
        for_each_line_capped(&input[..], 16, |line| {
            seen.push(line);
            std::future::ready(())
        })
        .await
        .unwrap();
        assert_eq!(seen, vec!["after"]);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let input: &[u8] = b"";
        let mut count = 0;
        for_each_line(input, |_| {
            count += 1;
            std::future::ready(())
        })
        .await
        .unwrap();
        assert_eq!(count, 0);
    }
}
