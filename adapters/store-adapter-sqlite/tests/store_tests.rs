//! Store adapter round-trip tests.

use payflow::store_adapter::{
	AddressPatch, AddressStatus, PoolState, PooledAddress, StoreAdapter,
};
use payflow::types::{Patch, SiteId, Timestamp};
use payflow_store_adapter_sqlite::StoreAdapterSqlite;
use tempfile::TempDir;

async fn create_test_adapter() -> (StoreAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter = StoreAdapterSqlite::new(temp_dir.path().join("payflow.db"))
		.await
		.expect("Failed to create adapter");
	(adapter, temp_dir)
}

fn sample_address(site: u32, index: u32) -> PooledAddress {
	PooledAddress {
		address: format!("bc1q-test-{}-{}", site, index).into(),
		site: SiteId(site),
		email: Some("payer@example.com".into()),
		status: AddressStatus::Reserved,
		reserved_at: Some(Timestamp(1_700_000_000)),
		last_checked: None,
		payment_count: 0,
		amount_sats: Some(42_000),
		derivation_index: Some(index),
	}
}

#[tokio::test]
async fn save_and_load_address() {
	let (adapter, _temp) = create_test_adapter().await;

	let addr = sample_address(1, 0);
	adapter.save_address(&addr).await.expect("save");

	let all = adapter.load_all_addresses().await.expect("load");
	assert_eq!(all.len(), 1);
	let loaded = &all[0];
	assert_eq!(loaded.address, addr.address);
	assert_eq!(loaded.site, SiteId(1));
	assert_eq!(loaded.email.as_deref(), Some("payer@example.com"));
	assert_eq!(loaded.status, AddressStatus::Reserved);
	assert_eq!(loaded.reserved_at, Some(Timestamp(1_700_000_000)));
	assert_eq!(loaded.amount_sats, Some(42_000));
	assert_eq!(loaded.derivation_index, Some(0));
}

#[tokio::test]
async fn save_is_an_upsert() {
	let (adapter, _temp) = create_test_adapter().await;

	let mut addr = sample_address(1, 0);
	adapter.save_address(&addr).await.expect("save");
	addr.payment_count = 3;
	addr.status = AddressStatus::Used;
	adapter.save_address(&addr).await.expect("second save");

	let all = adapter.load_all_addresses().await.expect("load");
	assert_eq!(all.len(), 1);
	assert_eq!(all[0].payment_count, 3);
	assert_eq!(all[0].status, AddressStatus::Used);
}

#[tokio::test]
async fn partial_update_touches_only_patched_fields() {
	let (adapter, _temp) = create_test_adapter().await;

	let addr = sample_address(1, 7);
	adapter.save_address(&addr).await.expect("save");

	adapter
		.update_address(&addr.address, &AddressPatch {
			status: Patch::Value(AddressStatus::Available),
			email: Patch::Null,
			reserved_at: Patch::Null,
			amount_sats: Patch::Null,
			..AddressPatch::default()
		})
		.await
		.expect("update");

	let all = adapter.load_all_addresses().await.expect("load");
	let loaded = &all[0];
	assert_eq!(loaded.status, AddressStatus::Available);
	assert_eq!(loaded.email, None);
	assert_eq!(loaded.reserved_at, None);
	assert_eq!(loaded.amount_sats, None);
	// Untouched fields survive
	assert_eq!(loaded.derivation_index, Some(7));
}

#[tokio::test]
async fn empty_patch_is_a_noop() {
	let (adapter, _temp) = create_test_adapter().await;

	let addr = sample_address(1, 0);
	adapter.save_address(&addr).await.expect("save");
	adapter
		.update_address(&addr.address, &AddressPatch::default())
		.await
		.expect("noop update");

	let all = adapter.load_all_addresses().await.expect("load");
	assert_eq!(all[0].status, AddressStatus::Reserved);
}

#[tokio::test]
async fn queue_round_trip_preserves_fifo_order() {
	let (adapter, _temp) = create_test_adapter().await;
	let site = SiteId(3);

	adapter.add_to_queue(site, "addr-b", Timestamp(200)).await.expect("add");
	adapter.add_to_queue(site, "addr-a", Timestamp(100)).await.expect("add");
	adapter.add_to_queue(site, "addr-c", Timestamp(300)).await.expect("add");

	let queue = adapter.load_queue(site).await.expect("load");
	let order: Vec<&str> = queue.iter().map(|(a, _)| a.as_ref()).collect();
	assert_eq!(order, vec!["addr-a", "addr-b", "addr-c"]);

	adapter.remove_from_queue(site, "addr-b").await.expect("remove");
	let queue = adapter.load_queue(site).await.expect("load");
	assert_eq!(queue.len(), 2);

	// Other sites see nothing
	assert!(adapter.load_queue(SiteId(4)).await.expect("load").is_empty());
}

#[tokio::test]
async fn pool_state_round_trip() {
	let (adapter, _temp) = create_test_adapter().await;
	let site = SiteId(1);

	assert!(adapter.load_pool_state(site).await.expect("load").is_none());

	adapter
		.save_pool_state(&PoolState { site, next_index: 17, start_index: 0 })
		.await
		.expect("save");
	adapter
		.save_pool_state(&PoolState { site, next_index: 18, start_index: 0 })
		.await
		.expect("save again");

	let state = adapter.load_pool_state(site).await.expect("load").expect("state");
	assert_eq!(state.next_index, 18);
	assert_eq!(state.start_index, 0);
}
