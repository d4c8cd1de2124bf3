//! Recycling sweep tests.
//!
//! The sweep is the safety net against fund loss: an expired reservation
//! only re-enters circulation after the oracle confirms zero balance and
//! zero transactions.

mod common;

use common::{harness, mock_address, reserved};
use payflow_types::types::{SiteId, Timestamp};

const T0: Timestamp = Timestamp(1_000_000);
const TTL: i64 = 72 * 3600;

fn past_ttl(base: Timestamp) -> Timestamp {
	Timestamp(base.0 + TTL + 60)
}

#[tokio::test]
async fn clean_expired_reservation_is_recycled() {
	let h = harness();
	let site = SiteId(1);
	let pool = h.registry.site(site).unwrap();
	pool.restore(vec![reserved(site, 0, "a@example.com", T0)], vec![], None).await;

	let summaries = h.registry.recycle_expired_at(past_ttl(T0)).await;
	assert_eq!(summaries.len(), 1);
	assert_eq!(summaries[0].scanned, 1);
	assert_eq!(summaries[0].recycled, 1);
	assert_eq!(summaries[0].marked_used, 0);

	let stats = pool.stats().await;
	assert_eq!(stats.reserved, 0);
	assert_eq!(stats.available_queued, 1);
	// Reclaimed addresses are shared cross-site
	assert_eq!(h.registry.global_pool().len(), 1);
}

#[tokio::test]
async fn late_payment_is_never_silently_recycled() {
	let h = harness();
	let site = SiteId(1);
	let pool = h.registry.site(site).unwrap();
	let addr = mock_address(site, 0);
	pool.restore(vec![reserved(site, 0, "a@example.com", T0)], vec![], None).await;

	// The abandoned-looking reservation actually got paid late
	h.oracle.set_history(&addr, 150_000, 2);

	let summaries = h.registry.recycle_expired_at(past_ttl(T0)).await;
	assert_eq!(summaries[0].marked_used, 1);
	assert_eq!(summaries[0].recycled, 0);

	// The address is retired, not recirculated: nothing queued, nothing
	// in the global pool, and the next allocation derives fresh.
	let stats = pool.stats().await;
	assert_eq!(stats.used, 1);
	assert_eq!(stats.available_queued, 0);
	assert!(h.registry.global_pool().is_empty());

	let next = pool
		.get_or_reuse_address_at("b@example.com", 1, past_ttl(T0))
		.await
		.unwrap();
	assert_ne!(next.as_ref(), addr.as_str());
}

#[tokio::test]
async fn oracle_failure_defers_to_next_sweep() {
	let h = harness();
	let site = SiteId(1);
	let pool = h.registry.site(site).unwrap();
	pool.restore(vec![reserved(site, 0, "a@example.com", T0)], vec![], None).await;

	h.oracle.set_unavailable(true);
	let summaries = h.registry.recycle_expired_at(past_ttl(T0)).await;
	assert_eq!(summaries[0].oracle_failures, 1);
	assert_eq!(summaries[0].recycled, 0);
	// Never guess: the reservation is left untouched
	assert_eq!(pool.stats().await.reserved, 1);

	// Oracle back: the retry round reclaims it
	h.oracle.set_unavailable(false);
	let summaries = h.registry.recycle_expired_at(Timestamp(past_ttl(T0).0 + 3600)).await;
	assert_eq!(summaries[0].recycled, 1);
	assert_eq!(pool.stats().await.reserved, 0);
}

#[tokio::test]
async fn fresh_reservations_are_not_scanned() {
	let h = harness();
	let site = SiteId(1);
	let pool = h.registry.site(site).unwrap();
	pool.restore(vec![reserved(site, 0, "a@example.com", T0)], vec![], None).await;

	let summaries = h.registry.recycle_expired_at(Timestamp(T0.0 + 3600)).await;
	assert_eq!(summaries[0].scanned, 0);
	assert_eq!(h.oracle.calls(), 0);
}

#[tokio::test]
async fn recycled_address_is_reused_before_generation() {
	let h = harness();
	let site = SiteId(1);
	let pool = h.registry.site(site).unwrap();
	let addr = mock_address(site, 0);
	pool.restore(vec![reserved(site, 0, "a@example.com", T0)], vec![], None).await;

	let sweep_at = past_ttl(T0);
	h.registry.recycle_expired_at(sweep_at).await;

	let next = pool
		.get_or_reuse_address_at("b@example.com", 1, Timestamp(sweep_at.0 + 60))
		.await
		.unwrap();
	assert_eq!(next.as_ref(), addr.as_str());
	assert_eq!(h.generator.generated.load(std::sync::atomic::Ordering::SeqCst), 0);

	// The old holder's mapping is gone; they would get a different
	// address now.
	let other = pool
		.get_or_reuse_address_at("a@example.com", 1, Timestamp(sweep_at.0 + 120))
		.await
		.unwrap();
	assert_ne!(other, next);
}

#[tokio::test]
async fn sweep_race_with_reassignment_is_safe() {
	let h = harness();
	let site = SiteId(1);
	let pool = h.registry.site(site).unwrap();
	pool.restore(vec![reserved(site, 0, "a@example.com", T0)], vec![], None).await;

	// Between candidate collection and the oracle answer the address was
	// reassigned (fresh reserved_at). Simulate by reassigning first and
	// sweeping with a clock where the new reservation is not yet expired.
	let reassign_at = past_ttl(T0);
	let address = pool
		.get_or_reuse_address_at("b@example.com", 1, reassign_at)
		.await
		.unwrap();
	assert_eq!(address.as_ref(), mock_address(site, 0).as_str());

	let summaries = h.registry.recycle_expired_at(Timestamp(reassign_at.0 + 60)).await;
	assert_eq!(summaries[0].scanned, 0);
	assert_eq!(pool.stats().await.reserved, 1);
}
