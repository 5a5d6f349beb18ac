use crate::outbox_event::Publication;
use std::collections::HashSet;

/// 计算尚未持久化的投递记录：`incoming` 中 `published_at` 不在 `stored` 里的部分，
/// 保持 `incoming` 的顺序
pub fn diff_publications<'a>(
    stored: &[Publication],
    incoming: &'a [Publication],
) -> Vec<&'a Publication> {
    let known: HashSet<_> = stored.iter().map(Publication::published_at).collect();

    incoming
        .iter()
        .filter(|p| !known.contains(&p.published_at()))
        .collect()
}
