use std::io;

use clouddrive_core::{DriveClient, NodePayload};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Body, Method};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use crate::error::TreeError;

const PIPE_CAPACITY: usize = 64 * 1024;
const BOUNDARY_LEN: usize = 30;

/// A reader that is known to yield at least one byte.
pub struct UploadContent<R> {
    reader: BufReader<R>,
}

impl<R> UploadContent<R>
where
    R: AsyncRead + Unpin,
{
    /// Peeks the first chunk. An empty reader fails with `NoContent` before
    /// anything is sent.
    pub async fn prepare(reader: R) -> Result<Self, TreeError> {
        let mut reader = BufReader::with_capacity(PIPE_CAPACITY, reader);
        if reader.fill_buf().await?.is_empty() {
            return Err(TreeError::NoContent);
        }
        Ok(Self { reader })
    }
}

/// Streams a multipart body through an in-memory pipe while the request is
/// in flight. A failed request wins over a failed producer.
pub(crate) async fn send_multipart<R>(
    client: &DriveClient,
    method: Method,
    url: Url,
    metadata: Option<String>,
    filename: &str,
    content: UploadContent<R>,
) -> Result<NodePayload, TreeError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let boundary = multipart_boundary();
    let content_type = format!("multipart/form-data; boundary={boundary}");
    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let filename = filename.to_string();

    let producer = tokio::spawn(async move {
        write_multipart(
            &mut writer,
            &boundary,
            metadata.as_deref(),
            &filename,
            content,
        )
        .await
    });

    let body = Body::wrap_stream(ReaderStream::new(reader));
    let response = client
        .upload_multipart(method, url, &content_type, body)
        .await;
    let produced = producer.await;

    let payload = response?;
    let written = produced?.map_err(TreeError::UploadBody)?;
    debug!(id = %payload.id, bytes = written, "upload finished");
    Ok(payload)
}

async fn write_multipart<W, R>(
    writer: &mut W,
    boundary: &str,
    metadata: Option<&str>,
    filename: &str,
    mut content: UploadContent<R>,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    if let Some(metadata) = metadata {
        let head = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n"
        );
        writer.write_all(head.as_bytes()).await?;
        writer.write_all(metadata.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
    }

    let head = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"content\"; filename=\"{}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n",
        escape_quotes(filename)
    );
    writer.write_all(head.as_bytes()).await?;
    let copied = tokio::io::copy_buf(&mut content.reader, writer).await?;
    writer
        .write_all(format!("\r\n--{boundary}--\r\n").as_bytes())
        .await?;
    writer.shutdown().await?;
    Ok(copied)
}

fn multipart_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect()
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
