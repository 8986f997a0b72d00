use std::collections::BTreeMap;

/// One restriction enzyme recognition motif. The panel is the common
/// BioBrick set; recognition sequences are concrete ACGT motifs, so a
/// plain window scan over the uppercased sequence is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestrictionSite {
    pub name: &'static str,
    pub recognition: &'static str,
}

pub const RESTRICTION_PANEL: &[RestrictionSite] = &[
    RestrictionSite { name: "EcoRI", recognition: "GAATTC" },
    RestrictionSite { name: "XbaI", recognition: "TCTAGA" },
    RestrictionSite { name: "SpeI", recognition: "ACTAGT" },
    RestrictionSite { name: "PstI", recognition: "CTGCAG" },
    RestrictionSite { name: "NheI", recognition: "GCTAGC" },
    RestrictionSite { name: "BglII", recognition: "AGATCT" },
    RestrictionSite { name: "BamHI", recognition: "GGATCC" },
    RestrictionSite { name: "XhoI", recognition: "CTCGAG" },
    RestrictionSite { name: "AgeI", recognition: "ACCGGT" },
    RestrictionSite { name: "AarI", recognition: "CACCTGC" },
];

/// A named assembly standard, defined by the restriction sites a part
/// must be free of to assemble under that standard.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyStandard {
    pub name: &'static str,
    pub sites: &'static [&'static str],
}

pub const ASSEMBLY_STANDARDS: &[AssemblyStandard] = &[
    AssemblyStandard { name: "RFC10", sites: &["EcoRI", "XbaI", "SpeI", "PstI"] },
    AssemblyStandard { name: "RFC12", sites: &["EcoRI", "SpeI", "NheI", "PstI"] },
    AssemblyStandard { name: "RFC21", sites: &["EcoRI", "BglII", "BamHI", "XhoI"] },
    AssemblyStandard { name: "RFC23", sites: &["EcoRI", "XbaI", "SpeI", "PstI"] },
    AssemblyStandard { name: "RFC25", sites: &["EcoRI", "XbaI", "AgeI", "SpeI", "PstI"] },
];

/// Finds every occurrence of each site motif in `sequence`. Positions
/// are 1-based starts of the recognition motif. Sites without a match
/// are omitted entirely; the map never holds an empty position list.
/// A malformed or empty sequence yields an empty map.
pub fn find_restriction_sites(
    sequence: &str,
    sites: &[RestrictionSite],
) -> BTreeMap<String, Vec<usize>> {
    let mut found = BTreeMap::new();
    let upper = sequence.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return found;
    }
    let bytes = upper.as_bytes();

    for site in sites {
        let motif = site.recognition.as_bytes();
        if motif.is_empty() || bytes.len() < motif.len() {
            continue;
        }
        let mut positions = Vec::new();
        for start in 0..=(bytes.len() - motif.len()) {
            if &bytes[start..start + motif.len()] == motif {
                positions.push(start + 1);
            }
        }
        if !positions.is_empty() {
            found.insert(site.name.to_string(), positions);
        }
    }

    found
}

/// Partitions the assembly standard panel into compatible and
/// incompatible sets for `sequence`. A standard is incompatible as soon
/// as any of its sites occurs at least once. Lists are duplicate-free;
/// an empty list is reported as `None` to keep "no sites looked up"
/// distinguishable from "all incompatible" downstream.
pub fn classify_assembly(sequence: &str) -> (Option<Vec<String>>, Option<Vec<String>>) {
    let site_hits = find_restriction_sites(sequence, RESTRICTION_PANEL);

    let mut compatible = Vec::new();
    let mut incompatible = Vec::new();

    for standard in ASSEMBLY_STANDARDS {
        let blocked = standard
            .sites
            .iter()
            .any(|site| site_hits.contains_key(*site));
        if blocked {
            incompatible.push(standard.name.to_string());
        } else {
            compatible.push(standard.name.to_string());
        }
    }

    (
        (!compatible.is_empty()).then_some(compatible),
        (!incompatible.is_empty()).then_some(incompatible),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_sites_with_one_based_positions() {
        let hits = find_restriction_sites("GAATTCACTAGT", RESTRICTION_PANEL);
        assert_eq!(hits.get("EcoRI"), Some(&vec![1]));
        assert_eq!(hits.get("SpeI"), Some(&vec![7]));
        assert!(!hits.contains_key("XbaI"));
    }

    #[test]
    fn repeated_site_lists_every_position() {
        let hits = find_restriction_sites("GAATTCAAGAATTC", RESTRICTION_PANEL);
        assert_eq!(hits.get("EcoRI"), Some(&vec![1, 9]));
    }

    #[test]
    fn lowercase_sequence_still_matches() {
        let hits = find_restriction_sites("gaattc", RESTRICTION_PANEL);
        assert_eq!(hits.get("EcoRI"), Some(&vec![1]));
    }

    #[test]
    fn no_empty_position_lists() {
        let hits = find_restriction_sites("AAAAAAAAAA", RESTRICTION_PANEL);
        assert!(hits.is_empty());
    }

    #[test]
    fn empty_sequence_yields_empty_map() {
        assert!(find_restriction_sites("", RESTRICTION_PANEL).is_empty());
        assert!(find_restriction_sites("  \n", RESTRICTION_PANEL).is_empty());
    }

    #[test]
    fn assembly_partition_is_exclusive() {
        // EcoRI blocks every standard in the panel.
        let (compatible, incompatible) = classify_assembly("GAATTC");
        assert!(compatible.is_none());
        let incompatible = incompatible.unwrap();
        for standard in ASSEMBLY_STANDARDS {
            assert_eq!(
                incompatible.iter().filter(|s| *s == standard.name).count(),
                1
            );
        }
    }

    #[test]
    fn clean_sequence_compatible_everywhere() {
        let (compatible, incompatible) = classify_assembly("ATGGCGGCAATG");
        assert!(incompatible.is_none());
        let compatible = compatible.unwrap();
        assert_eq!(compatible.len(), ASSEMBLY_STANDARDS.len());
    }

    #[test]
    fn bglii_splits_the_panel() {
        // AGATCT blocks only RFC21.
        let (compatible, incompatible) = classify_assembly("AGATCT");
        assert_eq!(incompatible.unwrap(), vec!["RFC21".to_string()]);
        let compatible = compatible.unwrap();
        assert!(compatible.contains(&"RFC10".to_string()));
        assert!(!compatible.contains(&"RFC21".to_string()));
    }
}
