use async_trait::async_trait;

/// HTTP authentication/authorization, deliberately out of scope: session
/// cookies, role-based access control, and routing middleware all live on
/// the other side of this trait. The proxy front end calls `authorize`
/// before it will resolve a tunnel for a request.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, instance_name: &str, token: Option<&str>) -> bool;
}

/// Permits everything — for tests and local development only.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _instance_name: &str, _token: Option<&str>) -> bool {
        true
    }
}
