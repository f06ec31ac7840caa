use std::collections::HashMap;

use crate::models::{RelState, UserPresence, VisiblePeer};
use crate::services::geo::{haversine_meters, GeoPoint};

/// Distance from the viewer to `peer` if the peer should be rendered.
///
/// The peer's own radius is the gate, not the viewer's: a user decides how
/// far their dot travels. Distance exactly equal to the radius is visible.
pub fn visible_distance(
    viewer_center: &GeoPoint,
    peer: &UserPresence,
    viewer_uid: &str,
) -> Option<f64> {
    if peer.uid == viewer_uid {
        return None;
    }
    let location = peer.location.as_ref()?;
    if !peer.visibility.enabled {
        return None;
    }
    // Out-of-range stored coordinates are treated as malformed.
    let peer_point = GeoPoint::new(location.lat, location.lng).ok()?;

    let center = GeoPoint::clamped(viewer_center.lat, viewer_center.lng);
    let distance = haversine_meters(&center, &peer_point);

    match peer.visibility.radius_meters {
        None => Some(distance),
        Some(radius) if distance <= radius => Some(distance),
        Some(_) => None,
    }
}

pub fn filter_visible_peers<'a>(
    viewer_center: &GeoPoint,
    peers: &'a [UserPresence],
    viewer_uid: &str,
) -> Vec<&'a UserPresence> {
    peers
        .iter()
        .filter(|p| visible_distance(viewer_center, p, viewer_uid).is_some())
        .collect()
}

/// Filters and turns peers into map markers, sorted by uid.
pub fn visible_peers<'a>(
    viewer_center: &GeoPoint,
    peers: impl IntoIterator<Item = &'a UserPresence>,
    viewer_uid: &str,
    relationships: &HashMap<String, RelState>,
) -> Vec<VisiblePeer> {
    let mut out: Vec<VisiblePeer> = peers
        .into_iter()
        .filter_map(|peer| {
            let distance = visible_distance(viewer_center, peer, viewer_uid)?;
            let location = peer.location.as_ref()?;
            Some(VisiblePeer {
                uid: peer.uid.clone(),
                display_name: peer.display_name.clone(),
                photo_url: peer.photo_url.clone(),
                lat: location.lat,
                lng: location.lng,
                distance_meters: distance,
                relationship: relationships.get(&peer.uid).copied(),
            })
        })
        .collect();
    out.sort_by(|a, b| a.uid.cmp(&b.uid));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PresenceLocation, Visibility};

    const VIEWER: &str = "viewer";

    fn peer(uid: &str, lat: f64, lng: f64, enabled: bool, radius: Option<f64>) -> UserPresence {
        UserPresence {
            uid: uid.to_string(),
            display_name: Some(uid.to_uppercase()),
            photo_url: None,
            location: Some(PresenceLocation {
                lat,
                lng,
                updated_at: "2026-10-17T00:00:00.000Z".to_string(),
            }),
            visibility: Visibility {
                enabled,
                radius_meters: radius,
            },
        }
    }

    fn uids(peers: &[&UserPresence]) -> Vec<String> {
        let mut v: Vec<String> = peers.iter().map(|p| p.uid.clone()).collect();
        v.sort();
        v
    }

    #[test]
    fn same_spot_within_one_mile_is_visible() {
        let center = GeoPoint::AUSTIN;
        let peers = vec![peer("a", 30.2672, -97.7431, true, Some(1609.344))];
        assert_eq!(uids(&filter_visible_peers(&center, &peers, VIEWER)), vec!["a"]);
    }

    #[test]
    fn peer_radius_gates_not_viewer_radius() {
        let center = GeoPoint::AUSTIN;
        // ~11.1 km north with a 1 km radius
        let peers = vec![peer("b", 30.3672, -97.7431, true, Some(1000.0))];
        assert!(filter_visible_peers(&center, &peers, VIEWER).is_empty());
    }

    #[test]
    fn disabled_peer_is_never_visible() {
        let center = GeoPoint::AUSTIN;
        let peers = vec![
            peer("c", 30.2672, -97.7431, false, None),
            peer("c2", 30.2672, -97.7431, false, Some(1.0e9)),
        ];
        assert!(filter_visible_peers(&center, &peers, VIEWER).is_empty());
    }

    #[test]
    fn worldwide_peer_is_visible_from_the_antipode() {
        let center = GeoPoint::AUSTIN;
        let anti = center.antipode();
        let peers = vec![peer("d", anti.lat, anti.lng, true, None)];
        assert_eq!(uids(&filter_visible_peers(&center, &peers, VIEWER)), vec!["d"]);
    }

    #[test]
    fn self_is_excluded_even_when_worldwide() {
        let center = GeoPoint::AUSTIN;
        let peers = vec![peer(VIEWER, 30.2672, -97.7431, true, None)];
        assert!(filter_visible_peers(&center, &peers, VIEWER).is_empty());
    }

    #[test]
    fn missing_location_is_skipped() {
        let center = GeoPoint::AUSTIN;
        let mut p = peer("e", 0.0, 0.0, true, None);
        p.location = None;
        assert!(filter_visible_peers(&center, &[p], VIEWER).is_empty());
    }

    #[test]
    fn boundary_distance_is_inclusive() {
        let center = GeoPoint::AUSTIN;
        let target = GeoPoint::new(30.2772, -97.7431).unwrap();
        let exact = haversine_meters(&center, &target);

        let inside = vec![peer("f", target.lat, target.lng, true, Some(exact))];
        assert_eq!(filter_visible_peers(&center, &inside, VIEWER).len(), 1);

        let outside = vec![peer("g", target.lat, target.lng, true, Some(exact - 0.01))];
        assert!(filter_visible_peers(&center, &outside, VIEWER).is_empty());
    }

    #[test]
    fn malformed_coordinates_do_not_poison_the_batch() {
        let center = GeoPoint::AUSTIN;
        let peers = vec![
            peer("nan", f64::NAN, -97.0, true, None),
            peer("range", 123.0, -97.0, true, None),
            peer("ok", 30.2672, -97.7431, true, None),
        ];
        assert_eq!(uids(&filter_visible_peers(&center, &peers, VIEWER)), vec!["ok"]);
    }

    #[test]
    fn out_of_range_viewer_center_does_not_crash() {
        let center = GeoPoint {
            lat: 500.0,
            lng: f64::INFINITY,
        };
        let peers = vec![peer("w", 10.0, 10.0, true, None)];
        assert_eq!(filter_visible_peers(&center, &peers, VIEWER).len(), 1);
    }

    #[test]
    fn output_does_not_depend_on_input_order() {
        let center = GeoPoint::AUSTIN;
        let mut peers = vec![
            peer("a", 30.2672, -97.7431, true, Some(1609.344)),
            peer("b", 30.3672, -97.7431, true, Some(1000.0)),
            peer("c", 30.2672, -97.7431, false, None),
            peer("d", -30.2672, 82.2569, true, None),
            peer("e", 30.30, -97.75, true, Some(10_000.0)),
        ];
        let forward = uids(&filter_visible_peers(&center, &peers, VIEWER));
        peers.reverse();
        let backward = uids(&filter_visible_peers(&center, &peers, VIEWER));
        peers.swap(0, 3);
        let shuffled = uids(&filter_visible_peers(&center, &peers, VIEWER));

        assert_eq!(forward, vec!["a", "d", "e"]);
        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn markers_carry_relationship_and_distance() {
        let center = GeoPoint::AUSTIN;
        let peers = vec![
            peer("z", 30.2672, -97.7431, true, None),
            peer("a", 30.2772, -97.7431, true, None),
        ];
        let mut rels = HashMap::new();
        rels.insert("z".to_string(), RelState::Accepted);

        let markers = visible_peers(&center, &peers, VIEWER, &rels);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].uid, "a");
        assert_eq!(markers[0].relationship, None);
        assert!(markers[0].distance_meters > 1_000.0);
        assert_eq!(markers[1].uid, "z");
        assert_eq!(markers[1].relationship, Some(RelState::Accepted));
        assert!(markers[1].distance_meters.abs() < 1e-6);
    }
}
