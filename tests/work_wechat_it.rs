// crates.io
use httpmock::prelude::*;
// self
use tpp_broker::{
	_preludet::*,
	auth::TenantId,
	vendor::{TenantClient, WorkWeChat, WorkWeChatConfig},
};

fn client(server: &MockServer) -> WorkWeChat {
	let (options, _) = mock_client_options(&server.base_url());
	let config = WorkWeChatConfig {
		corp_id: TenantId::new("ww1").expect("Corp id fixture should be valid."),
		corp_secret: "corp-secret".into(),
		agent_id: "1000002".into(),
		callback: None,
	};

	WorkWeChat::new(config, &options).expect("Client should build against the mock server.")
}

async fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/cgi-bin/gettoken")
				.query_param("corpid", "ww1")
				.query_param("corpsecret", "corp-secret");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"errcode":0,"errmsg":"ok","access_token":"WWTOKEN","expires_in":7200}"#);
		})
		.await
}

#[tokio::test]
async fn access_tokens_are_fetched_once_and_attached_to_calls() {
	let server = MockServer::start_async().await;
	let token = mock_token(&server).await;
	let agent = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/cgi-bin/agent/get")
				.query_param("access_token", "WWTOKEN")
				.query_param("agentid", "1000002");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"errcode":0,"errmsg":"ok","agentid":1000002,"name":"HR"}"#);
		})
		.await;
	let client = client(&server);
	let first = client.agent().await.expect("Agent lookup should succeed.");
	let second = client.agent().await.expect("Second lookup should reuse the token.");

	assert_eq!(first.str("name"), Some("HR"));
	assert_eq!(second.i64("agentid"), Some(1000002));
	assert_eq!(client.token().await.expect("Token should be cached."), "WWTOKEN");

	token.assert_calls_async(1).await;
	agent.assert_calls_async(2).await;
}

#[tokio::test]
async fn denied_departments_and_users_read_as_absent() {
	let server = MockServer::start_async().await;
	let _token = mock_token(&server).await;
	let denied = r#"{"errcode":60011,"errmsg":"no privilege to access/modify contact"}"#;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/department/get").query_param("id", "7");
			then.status(200).header("content-type", "application/json").body(denied);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/user/get").query_param("userid", "zhangsan");
			then.status(200).header("content-type", "application/json").body(denied);
		})
		.await;

	let client = client(&server);

	assert!(client.department("7").await.expect("Denial should not be an error.").is_none());
	assert!(client.user("zhangsan").await.expect("Denial should not be an error.").is_none());
}

#[tokio::test]
async fn denied_user_lists_still_return_their_members() {
	let server = MockServer::start_async().await;
	let _token = mock_token(&server).await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/user/list").query_param("department_id", "2");
			then.status(200).header("content-type", "application/json").body(
				r#"{"errcode":60011,"errmsg":"partial","userlist":[{"userid":"a"},{"userid":"b"}]}"#,
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/user/list").query_param("department_id", "3");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"errcode":40014,"errmsg":"invalid access_token"}"#);
		})
		.await;

	let client = client(&server);
	let users = client.users("2").await.expect("Partial list should be returned.");

	assert_eq!(users.len(), 2);
	assert_eq!(users[1]["userid"], "b");
	assert!(matches!(client.users("3").await, Err(Error::Vendor { code: 40014, .. })));
}

#[tokio::test]
async fn user_details_drop_the_status_envelope() {
	let server = MockServer::start_async().await;
	let _token = mock_token(&server).await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/user/get").query_param("userid", "lisi");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"errcode":0,"errmsg":"ok","userid":"lisi","name":"Li Si"}"#);
		})
		.await;

	let user = client(&server)
		.user("lisi")
		.await
		.expect("Lookup should succeed.")
		.expect("Readable users should be present.");

	assert_eq!(user.str("name"), Some("Li Si"));
	assert!(!user.contains("errcode"));
	assert!(!user.contains("errmsg"));
}

#[tokio::test]
async fn jsapi_tickets_ride_on_the_access_token() {
	let server = MockServer::start_async().await;
	let token = mock_token(&server).await;
	let ticket = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/cgi-bin/get_jsapi_ticket")
				.query_param("access_token", "WWTOKEN");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"errcode":0,"errmsg":"ok","ticket":"JSAPI","expires_in":7200}"#);
		})
		.await;
	let client = client(&server);

	assert_eq!(client.ticket().await.expect("Ticket should refresh."), "JSAPI");
	assert_eq!(client.ticket().await.expect("Ticket should be cached."), "JSAPI");

	token.assert_calls_async(1).await;
	ticket.assert_calls_async(1).await;
}

#[tokio::test]
async fn failed_token_refreshes_surface_as_transient_errors() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/gettoken");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"errcode":40001,"errmsg":"invalid credential"}"#);
		})
		.await;

	let err = client(&server).agent().await.expect_err("Missing token should fail the call.");

	assert!(matches!(err, Error::Transient(_)));
	assert!(err.is_retriable());
}
