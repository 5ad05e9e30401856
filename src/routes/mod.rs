pub mod admin_routes;
pub mod checks;
pub mod public_routes;
pub mod user_routes;

use axum::Router;
use serde::Deserialize;

use crate::AppState;

use self::{admin_routes::AdminRoutes, public_routes::PublicRoutes, user_routes::UserRoutes};

/// A way to group routes together.
///
/// Implementors of this trait return the router for their own module. Typically, you would group
/// routes by the permission their callers need, and enforce that permission with the extractors
/// in [`checks`].
///
/// For example, you can define a type to group moderator routes together.
/// ```ignore
/// pub struct ModeratorRoutes;
///
/// impl RoutesContainer for ModeratorRoutes {
///     fn get_all() -> Router<AppState> {
///         Router::new().route("/api/mod/ping", get(ping))
///     }
/// }
///
/// async fn ping(AdminUser(admin): AdminUser) -> String {
///     format!("Wow, you're a moderator {}, that's so cool!", admin.username)
/// }
/// ```
pub trait RoutesContainer {
    fn get_all() -> Router<AppState>;
}

/// Builds the complete application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(PublicRoutes::get_all())
        .merge(UserRoutes::get_all())
        .merge(AdminRoutes::get_all())
        .with_state(state)
}

/// `?page=` query shared by every paginated listing.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
}
