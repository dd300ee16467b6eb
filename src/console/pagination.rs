//! Stateless list pagination and the selectable-item button grid.

use super::event::{CallbackToken, Verb};
use super::render::Button;
use crate::entity::{Entity, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page<'a, T> {
    pub slice: &'a [T],
    pub page: usize,
    pub total_pages: usize,
    pub total_count: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

/// Slice `items` into page `page` of `page_size`. The page index is clamped and
/// there is always at least one (possibly empty) page.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> Page<'_, T> {
    let page_size = page_size.max(1);
    let total_pages = items.len().div_ceil(page_size).max(1);
    let page = page.min(total_pages - 1);
    let start = (page * page_size).min(items.len());
    let end = (start + page_size).min(items.len());

    Page {
        slice: &items[start..end],
        page,
        total_pages,
        total_count: items.len(),
        has_prev: page > 0,
        has_next: page + 1 < total_pages,
    }
}

/// One button per entity, then a navigation row when there is more than one page.
pub fn entity_buttons(page: &Page<'_, &Entity>, kind: EntityKind, label_max_chars: usize) -> Vec<Vec<Button>> {
    let mut rows: Vec<Vec<Button>> = page
        .slice
        .iter()
        .map(|entity| {
            vec![Button::new(
                entity.display_name(label_max_chars),
                CallbackToken::entity(Verb::Select, kind, entity.id.clone()),
            )]
        })
        .collect();

    if page.total_pages > 1 {
        let mut nav = Vec::with_capacity(3);
        if page.has_prev {
            nav.push(Button::new(
                "‹ Prev",
                CallbackToken::entity(Verb::Page, kind, (page.page - 1).to_string()),
            ));
        }
        nav.push(Button::new(
            format!("{}/{}", page.page + 1, page.total_pages),
            CallbackToken::new(Verb::Noop),
        ));
        if page.has_next {
            nav.push(Button::new(
                "Next ›",
                CallbackToken::entity(Verb::Page, kind, (page.page + 1).to_string()),
            ));
        }
        rows.push(nav);
    }

    rows
}
