use axum::{
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tower_sessions::{MemoryStore, SessionManagerLayer};

use crate::handlers;
use crate::middleware::auth_layer;
use crate::state::AppState;

pub mod health;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: true,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(_code: i32, message: impl Into<String>) -> Self {
        Self {
            code: false,
            message: message.into(),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn success_msg(message: impl Into<String>) -> Self {
        Self {
            code: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    // Session store (in-memory for now)
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false) // Set to true in production with HTTPS
        .with_http_only(true);

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Auth routes
        .route("/login", post(handlers::auth::login))
        .route("/logout", post(handlers::auth::logout))
        .route("/getInfo", get(handlers::auth::get_info))
        .route("/getRouters", get(handlers::auth::get_routers))
        // Department routes
        .route("/system/dept/list", get(handlers::department::list_depts))
        .route("/system/dept/list/exclude/:id", get(handlers::department::list_excluding))
        .route("/system/dept/treeselect", get(handlers::department::tree_select))
        .route(
            "/system/dept",
            post(handlers::department::add_dept).put(handlers::department::update_dept),
        )
        .route(
            "/system/dept/:id",
            get(handlers::department::get_dept).delete(handlers::department::delete_dept),
        )
        // Menu routes
        .route("/system/menu/list", get(handlers::menu::list_menus))
        .route("/system/menu/treeselect", get(handlers::menu::tree_select))
        .route(
            "/system/menu/roleMenuTreeselect/:roleId",
            get(handlers::menu::role_menu_tree),
        )
        .route(
            "/system/menu",
            post(handlers::menu::add_menu).put(handlers::menu::update_menu),
        )
        .route(
            "/system/menu/:id",
            get(handlers::menu::get_menu).delete(handlers::menu::delete_menu),
        )
        // Role routes
        .route("/system/role/list", get(handlers::role::list_roles))
        .route("/system/role/dataScope", put(handlers::role::update_data_scope))
        .route("/system/role/changeStatus", put(handlers::role::change_status))
        .route("/system/role/deptTree/:roleId", get(handlers::role::dept_tree))
        .route(
            "/system/role",
            post(handlers::role::add_role).put(handlers::role::update_role),
        )
        .route(
            "/system/role/:id",
            get(handlers::role::get_role).delete(handlers::role::delete_role),
        )
        // User routes
        .route("/system/user/list", get(handlers::user::list_users))
        .route("/system/user/authRole", put(handlers::user::auth_role))
        .route("/system/user/changeStatus", put(handlers::user::change_status))
        .route(
            "/system/user",
            post(handlers::user::add_user).put(handlers::user::update_user),
        )
        .route(
            "/system/user/:id",
            get(handlers::user::get_user).delete(handlers::user::delete_user),
        );

    Router::new()
        .nest("/api", api_routes)
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Fallback handler for 404
pub async fn fallback() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(404, "Not Found")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use axum::response::Response;
    use sea_orm::sea_query::Expr;
    use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
    use tower::ServiceExt;

    use crate::association;
    use crate::config::Config;
    use crate::db::ensure_admin;
    use crate::db::test_support::{memory_db, seed_dept, seed_menu, seed_role, seed_user};
    use crate::entity::{dept, menu, Status};
    use crate::permission::PermissionCache;
    use crate::scope::DataScope;

    async fn app_with_db() -> (Router, DatabaseConnection) {
        let db = memory_db().await;
        let config = Config::default();
        ensure_admin(&db, &config).await.unwrap();
        let perm = PermissionCache::new(db.clone(), config.super_admin_id)
            .await
            .unwrap();
        (create_router(AppState::new(db.clone(), perm, config)), db)
    }

    async fn app() -> Router {
        app_with_db().await.0
    }

    /// Root dept 1 (from bootstrap) with 100 → 101, 200 and an empty 300.
    /// alice (DEPT) and bob (CUSTOM on 200) sit in 100, carol (SELF) and
    /// dave in 101, erin in 200. All three roles grant the list menus.
    async fn seed_org(db: &DatabaseConnection) {
        seed_dept(db, 100, 1, "0,1", Status::Enabled).await;
        seed_dept(db, 101, 100, "0,1,100", Status::Enabled).await;
        seed_dept(db, 200, 1, "0,1", Status::Enabled).await;
        seed_dept(db, 300, 1, "0,1", Status::Enabled).await;

        seed_menu(db, 500, 0, "system:user:list, system:dept:list", Status::Enabled).await;
        seed_role(db, 10, "dept", DataScope::Dept, Status::Enabled).await;
        seed_role(db, 11, "custom", DataScope::Custom, Status::Enabled).await;
        seed_role(db, 12, "self", DataScope::SelfOnly, Status::Enabled).await;
        for role_id in [10, 11, 12] {
            association::replace_role_menus(db, role_id, &[500]).await.unwrap();
        }
        association::replace_role_depts(db, 11, &[200]).await.unwrap();

        seed_user(db, 20, "alice", 100).await;
        seed_user(db, 21, "bob", 100).await;
        seed_user(db, 22, "carol", 101).await;
        seed_user(db, 23, "dave", 101).await;
        seed_user(db, 24, "erin", 200).await;
        association::replace_user_roles(db, 20, &[10]).await.unwrap();
        association::replace_user_roles(db, 21, &[11]).await.unwrap();
        association::replace_user_roles(db, 22, &[12]).await.unwrap();
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(app: &Router, username: &str, password: &str) -> String {
        let body = serde_json::json!({ "username": username, "password": password });
        let request = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .unwrap()
            .to_string()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        cookie: &str,
        body: Option<serde_json::Value>,
    ) -> Response {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(request).await.unwrap()
    }

    async fn listed_ids(app: &Router, uri: &str, cookie: &str) -> Vec<i64> {
        let response = send(app, "GET", uri, cookie, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let mut ids: Vec<i64> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["id"].as_i64().unwrap())
            .collect();
        ids.sort_unstable();
        ids
    }

    async fn stored_dept(db: &DatabaseConnection, id: i64) -> Option<dept::Model> {
        dept::Entity::find_by_id(id).one(db).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app()
            .await
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_requires_session() {
        let response = app()
            .await
            .oneshot(
                Request::get("/api/system/user/list")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let response = app()
            .await
            .oneshot(Request::get("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_login_then_get_info() {
        let app = app().await;
        let cookie = login(&app, "admin", "admin123").await;

        let response = send(&app, "GET", "/api/getInfo", &cookie, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["permissions"], serde_json::json!(["*:*:*"]));
        assert_eq!(body["data"]["roles"], serde_json::json!(["admin"]));

        let response = send(&app, "GET", "/api/system/user/list", &cookie, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"][0]["userName"], "admin");
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let login = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"username":"admin","password":"nope"}"#))
            .unwrap();
        let response = app().await.oneshot(login).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_user_list_follows_data_scope() {
        let (app, db) = app_with_db().await;
        seed_org(&db).await;

        let alice = login(&app, "alice", "secret").await;
        assert_eq!(listed_ids(&app, "/api/system/user/list", &alice).await, vec![20, 21]);

        let bob = login(&app, "bob", "secret").await;
        assert_eq!(listed_ids(&app, "/api/system/user/list", &bob).await, vec![24]);

        let carol = login(&app, "carol", "secret").await;
        assert_eq!(listed_ids(&app, "/api/system/user/list", &carol).await, vec![22]);
    }

    #[tokio::test]
    async fn test_dept_list_follows_data_scope() {
        let (app, db) = app_with_db().await;
        seed_org(&db).await;

        let alice = login(&app, "alice", "secret").await;
        assert_eq!(listed_ids(&app, "/api/system/dept/list", &alice).await, vec![100]);

        let bob = login(&app, "bob", "secret").await;
        assert_eq!(listed_ids(&app, "/api/system/dept/list", &bob).await, vec![200]);

        // Self-only roles have no owner column on departments
        let carol = login(&app, "carol", "secret").await;
        assert!(listed_ids(&app, "/api/system/dept/list", &carol).await.is_empty());
    }

    #[tokio::test]
    async fn test_user_without_permission_is_forbidden() {
        let (app, db) = app_with_db().await;
        seed_org(&db).await;

        let dave = login(&app, "dave", "secret").await;
        let response = send(&app, "GET", "/api/system/user/list", &dave, None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_list_status_filter_takes_names() {
        let (app, db) = app_with_db().await;
        seed_org(&db).await;
        dept::Entity::update_many()
            .col_expr(dept::Column::Status, Expr::value(i32::from(Status::Disabled)))
            .filter(dept::Column::Id.eq(300))
            .exec(&db)
            .await
            .unwrap();
        let admin = login(&app, "admin", "admin123").await;

        let uri = "/api/system/dept/list?status=disabled";
        assert_eq!(listed_ids(&app, uri, &admin).await, vec![300]);

        let response = send(&app, "GET", "/api/system/dept/list?status=1", &admin, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dept_delete_guards() {
        let (app, db) = app_with_db().await;
        seed_org(&db).await;
        let admin = login(&app, "admin", "admin123").await;

        let response = send(&app, "DELETE", "/api/system/dept/100", &admin, None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = send(&app, "DELETE", "/api/system/dept/101", &admin, None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(stored_dept(&db, 100).await.is_some());
        assert!(stored_dept(&db, 101).await.is_some());

        association::replace_role_depts(&db, 11, &[200, 300]).await.unwrap();
        let response = send(&app, "DELETE", "/api/system/dept/300", &admin, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(stored_dept(&db, 300).await.is_none());
        assert_eq!(association::granted_dept_ids(&db, 11).await.unwrap(), vec![200]);
    }

    #[tokio::test]
    async fn test_menu_delete_guards() {
        let (app, db) = app_with_db().await;
        seed_org(&db).await;
        seed_menu(&db, 600, 0, "", Status::Enabled).await;
        seed_menu(&db, 601, 600, "system:role:list", Status::Enabled).await;
        let admin = login(&app, "admin", "admin123").await;

        let response = send(&app, "DELETE", "/api/system/menu/600", &admin, None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = send(&app, "DELETE", "/api/system/menu/500", &admin, None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = send(&app, "DELETE", "/api/system/menu/601", &admin, None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let left: Vec<i64> = menu::Entity::find()
            .all(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert!(left.contains(&500));
        assert!(left.contains(&600));
        assert!(!left.contains(&601));
    }

    #[tokio::test]
    async fn test_update_dept_moves_renames_and_reactivates() {
        let (app, db) = app_with_db().await;
        seed_org(&db).await;
        seed_dept(&db, 102, 101, "0,1,100,101", Status::Enabled).await;
        dept::Entity::update_many()
            .col_expr(dept::Column::Status, Expr::value(i32::from(Status::Disabled)))
            .filter(dept::Column::Id.eq(200))
            .exec(&db)
            .await
            .unwrap();
        let admin = login(&app, "admin", "admin123").await;

        let form = serde_json::json!({
            "id": 101,
            "parentId": 200,
            "deptName": "moved",
            "orderNum": 3,
            "status": "enabled",
        });
        let response = send(&app, "PUT", "/api/system/dept", &admin, Some(form)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let moved = stored_dept(&db, 101).await.unwrap();
        assert_eq!(moved.parent_id, 200);
        assert_eq!(moved.ancestors, "0,1,200");
        assert_eq!(moved.dept_name, "moved");
        assert_eq!(stored_dept(&db, 102).await.unwrap().ancestors, "0,1,200,101");
        assert_eq!(stored_dept(&db, 200).await.unwrap().status(), Status::Enabled);
    }

    #[tokio::test]
    async fn test_update_dept_rejections_write_nothing() {
        let (app, db) = app_with_db().await;
        seed_org(&db).await;
        let admin = login(&app, "admin", "admin123").await;

        // Under its own descendant
        let form = serde_json::json!({
            "id": 100,
            "parentId": 101,
            "deptName": "dept-100",
            "status": "enabled",
        });
        let response = send(&app, "PUT", "/api/system/dept", &admin, Some(form)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let unchanged = stored_dept(&db, 100).await.unwrap();
        assert_eq!(unchanged.parent_id, 1);
        assert_eq!(unchanged.ancestors, "0,1");

        // Disabling while a descendant is enabled
        let form = serde_json::json!({
            "id": 100,
            "parentId": 1,
            "deptName": "dept-100",
            "status": "disabled",
        });
        let response = send(&app, "PUT", "/api/system/dept", &admin, Some(form)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(stored_dept(&db, 100).await.unwrap().status(), Status::Enabled);
    }

    #[tokio::test]
    async fn test_update_menu_moves_and_reactivates() {
        let (app, db) = app_with_db().await;
        seed_menu(&db, 600, 0, "", Status::Disabled).await;
        seed_menu(&db, 700, 0, "", Status::Enabled).await;
        seed_menu(&db, 701, 700, "system:user:list", Status::Enabled).await;
        let admin = login(&app, "admin", "admin123").await;

        let form = serde_json::json!({
            "id": 700,
            "parentId": 600,
            "menuName": "moved",
            "menuType": "M",
            "status": "enabled",
        });
        let response = send(&app, "PUT", "/api/system/menu", &admin, Some(form)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let stored = |id: i64| {
            let db = db.clone();
            async move { menu::Entity::find_by_id(id).one(&db).await.unwrap().unwrap() }
        };
        assert_eq!(stored(700).await.ancestors, "0,600");
        assert_eq!(stored(700).await.menu_name, "moved");
        assert_eq!(stored(701).await.ancestors, "0,600,700");
        assert_eq!(stored(600).await.status(), Status::Enabled);
    }
}
