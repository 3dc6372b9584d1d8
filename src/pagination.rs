use sea_orm::{ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, Select};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: u64 = 10;
pub const MAX_PER_PAGE: u64 = 100;
pub const MAX_PAGE: u64 = 1_000_000_000;

/// `?page=&per_page=` as sent by clients. Values that are not integers fall
/// back to the defaults instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
    per_page: Option<String>,
}

impl PageQuery {
    /// Requested page, capped at [`MAX_PAGE`].
    pub fn page(&self) -> u64 {
        parse_positive(self.page.as_deref()).unwrap_or(1).min(MAX_PAGE)
    }

    /// Requested page size, capped at [`MAX_PER_PAGE`].
    pub fn per_page(&self) -> u64 {
        parse_positive(self.per_page.as_deref())
            .unwrap_or(DEFAULT_PER_PAGE)
            .min(MAX_PER_PAGE)
    }
}

fn parse_positive(raw: Option<&str>) -> Option<u64> {
    let value = raw?.trim().parse::<i64>().ok()?;
    Some(value.max(1) as u64)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Meta {
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: String,
    pub next: Option<String>,
    pub prev: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Collection<T> {
    pub items: Vec<T>,
    #[serde(rename = "_meta")]
    pub meta: Meta,
    #[serde(rename = "_links")]
    pub links: Links,
}

impl<T> Collection<T> {
    /// Describes `items` as page `page` of a result set of `total_items` rows.
    pub fn new(
        items: Vec<T>,
        page: u64,
        per_page: u64,
        total_items: u64,
        endpoint: &str,
        extra: &[(&str, String)],
    ) -> Self {
        let total_pages = total_items.div_ceil(per_page.max(1));
        let link = |p: u64| build_link(endpoint, p, per_page, extra);
        Collection {
            items,
            meta: Meta {
                page,
                per_page,
                total_pages,
                total_items,
            },
            links: Links {
                self_link: link(page),
                next: (page < total_pages).then(|| link(page + 1)),
                prev: (page > 1).then(|| link(page - 1)),
            },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Collection<U> {
        Collection {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
            links: self.links,
        }
    }

    /// Swaps in already converted items, keeping the paging metadata.
    pub fn with_items<U>(self, items: Vec<U>) -> Collection<U> {
        Collection {
            items,
            meta: self.meta,
            links: self.links,
        }
    }
}

/// Fetches one page of `select` and describes it.
///
/// `endpoint` is the path the links point back to and `extra` any query
/// parameters that must survive across pages. Page numbers are 1-based;
/// the page size must already be capped by the caller.
pub async fn to_collection_dict<E, C>(
    db: &C,
    select: Select<E>,
    page: u64,
    per_page: u64,
    endpoint: &str,
    extra: &[(&str, String)],
) -> Result<Collection<E::Model>, DbErr>
where
    E: EntityTrait,
    E::Model: Send + Sync,
    C: ConnectionTrait,
{
    let page = page.max(1);
    let per_page = per_page.max(1);
    let paginator = select.paginate(db, per_page);
    let total_items = paginator.num_items().await?;
    // an offset past the last row can only produce an empty page
    let in_range = (page - 1)
        .checked_mul(per_page)
        .is_some_and(|offset| offset < total_items);
    let items = if in_range {
        paginator.fetch_page(page - 1).await?
    } else {
        Vec::new()
    };
    Ok(Collection::new(items, page, per_page, total_items, endpoint, extra))
}

pub fn build_link(endpoint: &str, page: u64, per_page: u64, extra: &[(&str, String)]) -> String {
    let mut url = format!("{}?page={}&per_page={}", endpoint, page, per_page);
    for (key, value) in extra {
        url.push('&');
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test_db;
    use crate::entity::institucion;
    use sea_orm::{ActiveModelTrait, QueryOrder, Set};

    fn query(page: Option<&str>, per_page: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(str::to_string),
            per_page: per_page.map(str::to_string),
        }
    }

    #[test]
    fn page_query_defaults_and_caps() {
        assert_eq!(query(None, None).page(), 1);
        assert_eq!(query(None, None).per_page(), 10);
        assert_eq!(query(Some("3"), Some("1000")).per_page(), 100);
        assert_eq!(query(Some("abc"), Some("x")).page(), 1);
        assert_eq!(query(Some("-4"), Some("0")).page(), 1);
        assert_eq!(query(Some("-4"), Some("0")).per_page(), 1);
        assert_eq!(query(Some("9223372036854775807"), None).page(), MAX_PAGE);
    }

    #[test]
    fn links_keep_extra_params() {
        let extra = [("q", "rust y python".to_string())];
        assert_eq!(
            build_link("/api/posts/search", 2, 5, &extra),
            "/api/posts/search?page=2&per_page=5&q=rust%20y%20python"
        );
    }

    #[actix_web::test]
    async fn pages_through_rows() {
        let db = connect_test_db().await;
        for name in ["C", "A", "B"] {
            institucion::ActiveModel {
                nombre: Set(name.to_string()),
                ..Default::default()
            }
            .insert(&db)
            .await
            .unwrap();
        }
        let select = || institucion::Entity::find().order_by_asc(institucion::Column::Nombre);

        let first = to_collection_dict(&db, select(), 1, 2, "/api/instituciones", &[]).await.unwrap();
        let names: Vec<String> = first.items.iter().map(|i| i.nombre.clone()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(
            first.meta,
            Meta { page: 1, per_page: 2, total_pages: 2, total_items: 3 }
        );
        assert_eq!(first.links.next.as_deref(), Some("/api/instituciones?page=2&per_page=2"));
        assert_eq!(first.links.prev, None);

        let second = to_collection_dict(&db, select(), 2, 2, "/api/instituciones", &[]).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.links.next, None);
        assert_eq!(second.links.prev.as_deref(), Some("/api/instituciones?page=1&per_page=2"));

        let beyond = to_collection_dict(&db, select(), 9, 2, "/api/instituciones", &[]).await.unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.meta.page, 9);
    }

    #[actix_web::test]
    async fn empty_table_has_no_pages() {
        let db = connect_test_db().await;
        let page = to_collection_dict(&db, institucion::Entity::find(), 1, 10, "/api/instituciones", &[])
            .await
            .unwrap();
        assert_eq!(page.meta.total_pages, 0);
        assert_eq!(page.meta.total_items, 0);
        assert_eq!(page.links.next, None);
    }

    #[actix_web::test]
    async fn huge_page_is_empty() {
        let db = connect_test_db().await;
        institucion::ActiveModel {
            nombre: Set("A".to_string()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let page = to_collection_dict(&db, institucion::Entity::find(), u64::MAX, MAX_PER_PAGE, "/api/instituciones", &[])
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.meta.total_items, 1);
        assert_eq!(page.links.next, None);
        assert_eq!(
            page.links.prev,
            Some(format!("/api/instituciones?page={}&per_page=100", u64::MAX - 1))
        );
    }
}
