//! Shop directory: fetching, favorites-first ordering and directions links.

use crate::api::PrintShopApi;
use crate::config::LocationConfig;
use crate::favorites::Favorites;
use crate::models::{Location, Shop};

/// Shops shown in the "nearest" group before the rest
const NEAREST_GROUP: usize = 5;

/// Pick where to search from: flags first, then config. None means no location.
pub fn resolve_location(
    lat: Option<f64>,
    long: Option<f64>,
    config: Option<&LocationConfig>,
) -> Option<Location> {
    match (lat, long) {
        (Some(lat), Some(long)) => Some(Location { lat, long }),
        _ => config.map(|c| Location {
            lat: c.lat,
            long: c.long,
        }),
    }
}

/// Fetch the directory. Failures leave the list empty; there is no retry.
pub fn fetch_nearby(api: &dyn PrintShopApi, near: Option<Location>) -> Vec<Shop> {
    match api.shops(near) {
        Ok(shops) => {
            tracing::info!(count = shops.len(), located = near.is_some(), "fetched shops");
            shops
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to fetch shops");
            Vec::new()
        }
    }
}

/// Grouping used when picking a shop for a queue print
#[derive(Debug, PartialEq)]
pub struct ShopSelector<'a> {
    pub favorites: Vec<&'a Shop>,
    pub nearest: Vec<&'a Shop>,
    pub more: Vec<&'a Shop>,
}

/// Group shops without reordering them; favorites also appear in their
/// regular group.
pub fn selector<'a>(shops: &'a [Shop], favorites: &Favorites) -> ShopSelector<'a> {
    let split = shops.len().min(NEAREST_GROUP);
    ShopSelector {
        favorites: shops.iter().filter(|s| favorites.contains(s.id)).collect(),
        nearest: shops[..split].iter().collect(),
        more: shops[split..].iter().collect(),
    }
}

pub fn find(shops: &[Shop], id: i64) -> Option<&Shop> {
    shops.iter().find(|s| s.id == id)
}

/// Google Maps directions link; only for known, non-zero coordinates
pub fn directions_url(lat: Option<f64>, long: Option<f64>) -> Option<String> {
    match (lat, long) {
        (Some(lat), Some(long)) if lat != 0.0 && long != 0.0 => Some(format!(
            "https://www.google.com/maps/dir/?api=1&destination={},{}",
            lat, long
        )),
        _ => None,
    }
}

pub fn format_distance(distance: Option<f64>) -> String {
    match distance {
        Some(d) => format!("{:.2} km", d),
        None => "? km".to_string(),
    }
}

/// One line per shop, starred when it is a favorite
pub fn format_shop(shop: &Shop, favorites: &Favorites) -> String {
    let marker = if favorites.contains(shop.id) { "⭐" } else { "🏪" };
    let mut line = format!(
        "{} [{}] {} - {}",
        marker,
        shop.id,
        shop.username,
        format_distance(shop.distance)
    );
    if let Some(address) = shop.address.as_deref().filter(|a| !a.is_empty()) {
        line.push_str(&format!(" ({})", address));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;

    fn shop(id: i64, distance: f64) -> Shop {
        Shop {
            id,
            username: format!("shop{}", id),
            distance: Some(distance),
            lat: Some(12.0 + id as f64 / 100.0),
            long: Some(77.0),
            address: None,
        }
    }

    #[test]
    fn test_selector_keeps_backend_order() {
        let shops: Vec<Shop> = (1..=7).map(|i| shop(i, i as f64)).collect();
        let mut favs = Favorites::default();
        favs.toggle(6);
        favs.toggle(2);

        let sel = selector(&shops, &favs);
        let ids = |v: &Vec<&Shop>| v.iter().map(|s| s.id).collect::<Vec<_>>();
        assert_eq!(ids(&sel.favorites), vec![2, 6]);
        assert_eq!(ids(&sel.nearest), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(&sel.more), vec![6, 7]);
    }

    #[test]
    fn test_selector_small_list() {
        let shops = vec![shop(1, 0.5)];
        let sel = selector(&shops, &Favorites::default());
        assert!(sel.favorites.is_empty());
        assert_eq!(sel.nearest.len(), 1);
        assert!(sel.more.is_empty());
    }

    #[test]
    fn test_fetch_failure_leaves_empty_list() {
        let api = FakeApi {
            shops_fail: true,
            ..FakeApi::default()
        };
        assert!(fetch_nearby(&api, None).is_empty());
    }

    #[test]
    fn test_resolve_location_prefers_flags() {
        let cfg = LocationConfig {
            lat: 1.0,
            long: 2.0,
        };
        assert_eq!(
            resolve_location(Some(3.0), Some(4.0), Some(&cfg)),
            Some(Location { lat: 3.0, long: 4.0 })
        );
        assert_eq!(
            resolve_location(Some(3.0), None, Some(&cfg)),
            Some(Location { lat: 1.0, long: 2.0 })
        );
        assert_eq!(resolve_location(None, None, None), None);
    }

    #[test]
    fn test_directions_url() {
        assert_eq!(
            directions_url(Some(12.97), Some(77.59)).unwrap(),
            "https://www.google.com/maps/dir/?api=1&destination=12.97,77.59"
        );
        assert!(directions_url(Some(0.0), Some(77.59)).is_none());
        assert!(directions_url(None, Some(77.59)).is_none());
    }

    #[test]
    fn test_format_shop() {
        let mut favs = Favorites::default();
        let s = shop(3, 1.234);
        assert_eq!(format_shop(&s, &favs), "🏪 [3] shop3 - 1.23 km");
        favs.toggle(3);
        assert!(format_shop(&s, &favs).starts_with("⭐"));
    }
}
