use std::cmp::Reverse;

use couchgraph_codec::PendingWrite;

/// Pending writes split by write path.
#[derive(Debug, Default)]
pub struct WritePlan {
    /// Placeholder + multipart upload, largest payload first.
    pub multipart: Vec<PendingWrite>,
    /// One batched write with attachments inline.
    pub batch: Vec<PendingWrite>,
}

/// Route each write by its total attachment payload. Only payloads strictly
/// larger than `threshold` take the multipart path.
pub fn plan(writes: Vec<PendingWrite>, threshold: usize) -> WritePlan {
    let (mut multipart, batch): (Vec<_>, Vec<_>) = writes
        .into_iter()
        .partition(|write| write.attachment_bytes() > threshold);
    multipart.sort_by_key(|write| Reverse(write.attachment_bytes()));
    WritePlan { multipart, batch }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use couchgraph_store::{AttachmentBlob, RawDocument};
    use couchgraph_types::{Fields, ObjRef, Type};

    fn write(id: &str, sizes: &[usize]) -> PendingWrite {
        let blobs: BTreeMap<String, AttachmentBlob> = sizes
            .iter()
            .enumerate()
            .map(|(i, n)| (format!("self.a{i}"), AttachmentBlob::new("x", vec![0; *n])))
            .collect();
        PendingWrite {
            obj: ObjRef::record(Type::new("app", "Thing"), Fields::new()),
            document: RawDocument::new(id),
            blobs,
        }
    }

    #[test]
    fn threshold_is_exclusive() {
        let plan = plan(vec![write("at", &[2048]), write("over", &[2049])], 2048);
        assert_eq!(plan.batch.len(), 1);
        assert_eq!(plan.batch[0].id(), "at");
        assert_eq!(plan.multipart.len(), 1);
        assert_eq!(plan.multipart[0].id(), "over");
    }

    #[test]
    fn payload_is_summed_per_document() {
        let plan = plan(vec![write("split", &[1500, 1500])], 2048);
        assert_eq!(plan.multipart.len(), 1);
    }

    #[test]
    fn largest_first() {
        let plan = plan(
            vec![write("mid", &[5000]), write("big", &[9000]), write("small", &[3000])],
            2048,
        );
        let order: Vec<&str> = plan.multipart.iter().map(PendingWrite::id).collect();
        assert_eq!(order, ["big", "mid", "small"]);
    }

    #[test]
    fn batch_keeps_pack_order() {
        let plan = plan(vec![write("b", &[]), write("a", &[10])], 2048);
        let order: Vec<&str> = plan.batch.iter().map(PendingWrite::id).collect();
        assert_eq!(order, ["b", "a"]);
    }
}
