/// Detector class identifiers mapped to the names used in spoken alerts.
const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("person", "Person"),
    ("bicycle", "Bicycle"),
    ("car", "Car"),
    ("motorcycle", "Motorcycle"),
    ("bus", "Bus"),
    ("truck", "Truck"),
    ("traffic light", "Traffic light"),
    ("stop sign", "Stop sign"),
    ("bench", "Bench"),
    ("dog", "Dog"),
    ("cat", "Cat"),
    ("chair", "Chair"),
    ("couch", "Couch"),
    ("bed", "Bed"),
    ("dining table", "Table"),
    ("toilet", "Toilet"),
    ("tv", "TV"),
    ("laptop", "Laptop"),
    ("cell phone", "Phone"),
    ("book", "Book"),
    ("bottle", "Bottle"),
    ("cup", "Cup"),
];

/// Display name for a detector class; unknown classes are returned unchanged.
pub fn display_name(class: &str) -> &str {
    DISPLAY_NAMES
        .iter()
        .find(|(id, _)| *id == class)
        .map(|(_, name)| *name)
        .unwrap_or(class)
}
