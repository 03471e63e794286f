//! Link ordering and aggregation for profile views

use crate::model::{DisplayState, EvaluatedLink, Link, VisitorContext};
use crate::visibility::evaluate;

/// Builds the ordered list of links a visitor receives
///
/// Hidden links are dropped, survivors are tagged `VisibleLocked` or
/// `VisibleOpen`, and the result is sorted by `order` ascending. The sort is
/// stable: links sharing an `order` keep their stored sequence.
///
/// Returns an empty vector when nothing survives filtering.
pub fn aggregate(links: &[Link], ctx: &VisitorContext) -> Vec<EvaluatedLink> {
    let mut visible: Vec<EvaluatedLink> = links
        .iter()
        .filter(|link| evaluate(link, ctx))
        .map(|link| EvaluatedLink {
            display_state: display_state(link),
            link: link.clone(),
        })
        .collect();

    visible.sort_by_key(|evaluated| evaluated.link.order);
    visible
}

fn display_state(link: &Link) -> DisplayState {
    if link.is_locked() {
        DisplayState::VisibleLocked
    } else {
        DisplayState::VisibleOpen
    }
}
