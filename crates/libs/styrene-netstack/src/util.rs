use crate::error::NetError;

/// Maximum number of payload bytes rendered into a trace line.
pub const PREVIEW_LIMIT: usize = 32;

pub fn payload_preview(bytes: &[u8], limit: usize) -> String {
    let end = bytes.len().min(limit);
    let mut preview = hex::encode(&bytes[..end]);
    if bytes.len() > end {
        preview.push_str("..");
    }
    preview
}

/// Copies a frame into an owned buffer, reporting allocation failure instead of aborting.
pub(crate) fn copy_frame(data: &[u8]) -> Result<Vec<u8>, NetError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(data.len()).map_err(|_| {
        log::error!("allocation failure, len={}", data.len());
        NetError::AllocationFailure { len: data.len() }
    })?;
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Trace-level dump of a frame, the debug side channel for ingress/egress paths.
pub(crate) fn trace_dump(context: &str, bytes: &[u8]) {
    if log::log_enabled!(log::Level::Trace) {
        let preview = payload_preview(bytes, PREVIEW_LIMIT);
        log::trace!("{} len={} data={}", context, bytes.len(), preview);
    }
}
