//! Multi-page traversal with throttle-aware retries.
//!
//! Every walker is a bounded loop that accumulates pages in arrival order. A fetch that
//! fails with [`Error::Throttled`] sleeps [`TraversalPolicy::backoff`] and retries the same
//! page, up to [`TraversalPolicy::max_retries`] consecutive times. Walks that keep receiving
//! continuations past [`TraversalPolicy::max_pages`] stop with [`Error::TraversalLimit`].

// std
use std::{collections::HashSet, hash::Hash, time::Duration as StdDuration};
// self
use crate::{
	_prelude::*,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Limits and pacing shared by all walkers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraversalPolicy {
	/// Consecutive throttled retries allowed per page.
	pub max_retries: usize,
	/// Sleep between throttled retries.
	pub backoff: Duration,
	/// Upper bound on pages fetched by one walk.
	pub max_pages: usize,
	/// Fixed delay between pages.
	pub page_delay: Duration,
	/// Upper bound on nodes visited by [`expand_tree`].
	pub max_nodes: usize,
}
impl TraversalPolicy {
	/// Overrides the inter-page delay.
	pub fn with_page_delay(mut self, delay: Duration) -> Self {
		self.page_delay = delay;

		self
	}

	/// Overrides the page cap.
	pub fn with_max_pages(mut self, max_pages: usize) -> Self {
		self.max_pages = max_pages;

		self
	}
}
impl Default for TraversalPolicy {
	fn default() -> Self {
		Self {
			max_retries: 5,
			backoff: Duration::SECOND,
			max_pages: 10_000,
			page_delay: Duration::ZERO,
			max_nodes: 100_000,
		}
	}
}

/// One fetched page and the continuation to the next one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T, C> {
	/// Items in arrival order.
	pub items: Vec<T>,
	/// Continuation; `None` ends the walk.
	pub next: Option<C>,
}
impl<T, C> Page<T, C> {
	/// Page with an explicit continuation.
	pub fn new(items: Vec<T>, next: Option<C>) -> Self {
		Self { items, next }
	}

	/// Final page.
	pub fn last(items: Vec<T>) -> Self {
		Self { items, next: None }
	}
}
impl<T> Page<T, i64> {
	/// Cursor page: continues with `next_cursor` while `has_more` holds.
	pub fn cursor(items: Vec<T>, has_more: bool, next_cursor: i64) -> Self {
		Self { items, next: has_more.then_some(next_cursor) }
	}
}
impl<T> Page<T, String> {
	/// Page-token page: continues while a non-empty token is present and `has_more` is not
	/// explicitly false.
	pub fn token(items: Vec<T>, has_more: Option<bool>, page_token: Option<String>) -> Self {
		let next = page_token.filter(|token| !token.is_empty() && has_more != Some(false));

		Self { items, next }
	}
}

async fn pause(delay: Duration) {
	match StdDuration::try_from(delay) {
		Ok(delay) if !delay.is_zero() => tokio::time::sleep(delay).await,
		_ => (),
	}
}

async fn fetch_with_retry<A, R, F, Fut>(
	policy: &TraversalPolicy,
	fetch: &mut F,
	arg: A,
) -> Result<R>
where
	A: Clone,
	F: FnMut(A) -> Fut,
	Fut: Future<Output = Result<R>>,
{
	let mut retries = 0;

	loop {
		match fetch(arg.clone()).await {
			Err(Error::Throttled { code, message }) if retries < policy.max_retries => {
				retries += 1;

				tracing::warn!(
					code,
					vendor_message = %message,
					retries,
					"Page fetch throttled; backing off."
				);
				pause(policy.backoff).await;
			},
			result => return result,
		}
	}
}

async fn observed<T, Fut>(stage: &'static str, walk: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	let span = FlowSpan::new(FlowKind::Traversal, stage);

	obs::record_flow_outcome(FlowKind::Traversal, FlowOutcome::Attempt);

	let result = span.instrument(walk).await;

	obs::observe(FlowKind::Traversal, result)
}

/// Walks pages starting at `start` until a page carries no continuation.
pub async fn walk<T, C, F, Fut>(
	policy: &TraversalPolicy,
	start: C,
	mut fetch: F,
) -> Result<Vec<T>>
where
	C: Clone,
	F: FnMut(C) -> Fut,
	Fut: Future<Output = Result<Page<T, C>>>,
{
	observed("walk", async move {
		let mut items = Vec::new();
		let mut cursor = start;
		let mut pages = 0;

		loop {
			let page = fetch_with_retry(policy, &mut fetch, cursor).await?;

			pages += 1;
			items.extend(page.items);

			let Some(next) = page.next else {
				return Ok(items);
			};

			if pages >= policy.max_pages {
				return Err(Error::TraversalLimit { pages });
			}

			pause(policy.page_delay).await;

			cursor = next;
		}
	})
	.await
}

/// Cursor walk: `fetch(cursor)` returns [`Page::cursor`] pages.
pub async fn walk_cursor<T, F, Fut>(
	policy: &TraversalPolicy,
	start: i64,
	fetch: F,
) -> Result<Vec<T>>
where
	F: FnMut(i64) -> Fut,
	Fut: Future<Output = Result<Page<T, i64>>>,
{
	walk(policy, start, fetch).await
}

/// Page-token walk: the first call receives `None`, later calls the previous token.
pub async fn walk_page_token<T, F, Fut>(policy: &TraversalPolicy, mut fetch: F) -> Result<Vec<T>>
where
	F: FnMut(Option<String>) -> Fut,
	Fut: Future<Output = Result<Page<T, String>>>,
{
	walk(policy, None, |token: Option<String>| {
		let page = fetch(token);

		async move {
			let page = page.await?;

			Ok::<_, Error>(Page::new(page.items, page.next.map(Some)))
		}
	})
	.await
}

/// Offset walk: `fetch(offset)` returns the page and the reported total; stops once the
/// accumulated count reaches the total or a page comes back empty.
pub async fn walk_offset<T, F, Fut>(
	policy: &TraversalPolicy,
	batch: usize,
	mut fetch: F,
) -> Result<Vec<T>>
where
	F: FnMut(usize) -> Fut,
	Fut: Future<Output = Result<(Vec<T>, usize)>>,
{
	observed("walk_offset", async move {
		let mut items = Vec::new();
		let mut offset = 0;
		let mut pages = 0;

		loop {
			let (page, total) = fetch_with_retry(policy, &mut fetch, offset).await?;
			let empty = page.is_empty();

			pages += 1;
			items.extend(page);

			if empty || items.len() >= total {
				return Ok(items);
			}
			if pages >= policy.max_pages {
				return Err(Error::TraversalLimit { pages });
			}

			pause(policy.page_delay).await;

			offset += batch;
		}
	})
	.await
}

/// Page-number walk: continues with `page + 1` while pages hold at least `min_len` items.
pub async fn walk_pages<T, F, Fut>(
	policy: &TraversalPolicy,
	start: u32,
	min_len: usize,
	mut fetch: F,
) -> Result<Vec<T>>
where
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = Result<Vec<T>>>,
{
	walk(policy, start, |page: u32| {
		let items = fetch(page);

		async move {
			let items = items.await?;
			let next = (items.len() >= min_len.max(1)).then_some(page.saturating_add(1));

			Ok::<_, Error>(Page::new(items, next))
		}
	})
	.await
}

/// Breadth-first expansion: returns `roots` followed by their descendants in discovery order,
/// visiting every id once.
pub async fn expand_tree<K, F, Fut>(
	policy: &TraversalPolicy,
	roots: Vec<K>,
	mut fetch_children: F,
) -> Result<Vec<K>>
where
	K: Clone + Eq + Hash,
	F: FnMut(K) -> Fut,
	Fut: Future<Output = Result<Vec<K>>>,
{
	observed("expand_tree", async move {
		let mut seen = HashSet::new();
		let mut order = Vec::new();

		for root in roots {
			if seen.insert(root.clone()) {
				order.push(root);
			}
		}

		let mut cursor = 0;

		while let Some(node) = order.get(cursor).cloned() {
			cursor += 1;

			for child in fetch_with_retry(policy, &mut fetch_children, node).await? {
				if seen.insert(child.clone()) {
					if order.len() >= policy.max_nodes {
						return Err(Error::TraversalLimit { pages: cursor });
					}

					order.push(child);
				}
			}

			if cursor < order.len() {
				pause(policy.page_delay).await;
			}
		}

		Ok(order)
	})
	.await
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn cursor_walk_preserves_arrival_order() {
		let policy = TraversalPolicy::default();
		let mut calls = Vec::new();
		let items = walk_cursor(&policy, 0, |cursor| {
			calls.push(cursor);

			async move {
				Ok(match cursor {
					0 => Page::cursor(vec![1, 2], true, 2),
					2 => Page::cursor(vec![3], true, 3),
					_ => Page::cursor(vec![4], false, 0),
				})
			}
		})
		.await
		.expect("Cursor walk should finish.");

		assert_eq!(items, [1, 2, 3, 4]);
		assert_eq!(calls, [0, 2, 3]);
	}

	#[tokio::test]
	async fn page_numbers_stop_on_short_pages() {
		let policy = TraversalPolicy::default();
		let items = walk_pages(&policy, 1, 2, |page| async move {
			Ok(match page {
				1 => vec!["a", "b"],
				2 => vec!["c", "d", "e"],
				_ => vec!["f"],
			})
		})
		.await
		.expect("Page walk should finish.");

		assert_eq!(items, ["a", "b", "c", "d", "e", "f"]);
	}

	#[tokio::test]
	async fn vendor_errors_are_not_retried() {
		let policy = TraversalPolicy::default();
		let mut calls = 0;
		let result = walk_pages::<u8, _, _>(&policy, 1, 1, |_| {
			calls += 1;

			async { Err(Error::Vendor { code: 60011, message: "no privilege".into() }) }
		})
		.await;

		assert!(matches!(result, Err(Error::Vendor { code: 60011, .. })));
		assert_eq!(calls, 1);
	}

	#[tokio::test]
	async fn tree_expansion_is_breadth_first_and_deduplicated() {
		let policy = TraversalPolicy::default();
		let tree = expand_tree(&policy, vec![1, 1], |node| async move {
			Ok(match node {
				1 => vec![2, 3],
				2 => vec![4, 3],
				3 => vec![5, 1],
				_ => vec![],
			})
		})
		.await
		.expect("Expansion should finish.");

		assert_eq!(tree, [1, 2, 3, 4, 5]);
	}

	#[tokio::test]
	async fn tree_expansion_honors_the_node_cap() {
		let policy = TraversalPolicy { max_nodes: 3, ..Default::default() };
		let result =
			expand_tree(&policy, vec![0_u32], |node| async move { Ok(vec![node + 1]) }).await;

		assert!(matches!(result, Err(Error::TraversalLimit { .. })));
	}
}
