pub const COUNTS_HEADER: [&str; 8] = [
    "Chrom", "Pos", "ID", "Ref", "A_count", "C_count", "G_count", "T_count",
];

pub const COMMENT_MARKER: char = '#';

const ALLELE_DEPTH_KEY: &str = "AD";
const INFO_FIELD_INDEX: usize = 7;

pub fn counts_header() -> &'static [&'static str; 8] {
    &COUNTS_HEADER
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteRecord<'a> {
    pub chromosome: &'a str,
    pub position: &'a str,
    pub id: &'a str,
    pub reference: &'a str,
    pub alternates: &'a str,
    pub info: &'a str,
}

impl<'a> SiteRecord<'a> {
    pub fn parse(line: &'a str) -> Self {
        let mut fields = line.split('\t');
        let chromosome = fields.next().unwrap_or_default();
        let position = fields.next().unwrap_or_default();
        let id = fields.next().unwrap_or_default();
        let reference = fields.next().unwrap_or_default();
        let alternates = fields.next().unwrap_or_default();
        // QUAL and FILTER sit between ALT and INFO.
        let info = fields.nth(INFO_FIELD_INDEX - 5).unwrap_or_default();

        Self {
            chromosome,
            position,
            id,
            reference,
            alternates,
            info,
        }
    }

    pub fn allele_depth(&self) -> Option<&'a str> {
        extract_allele_depth(self.info)
    }
}

pub fn is_comment_line(line: &str) -> bool {
    line.starts_with(COMMENT_MARKER)
}

// Key must be exactly `AD`; a bare `AD` flag reads as absent.
pub fn extract_allele_depth(info: &str) -> Option<&str> {
    info.split(';').find_map(|token| {
        let (key, value) = token.split_once('=')?;
        (key == ALLELE_DEPTH_KEY).then_some(value)
    })
}

pub fn allele_list<'a>(reference: &'a str, alternates: &'a str) -> impl Iterator<Item = &'a str> {
    std::iter::once(reference).chain(alternates.split(','))
}

fn nucleotide_slot(allele: &str) -> Option<usize> {
    match allele {
        "A" => Some(0),
        "C" => Some(1),
        "G" => Some(2),
        "T" => Some(3),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NucleotideCounts {
    counts: [u64; 4],
}

impl NucleotideCounts {
    pub fn from_array(counts: [u64; 4]) -> Self {
        Self { counts }
    }

    pub fn as_array(&self) -> [u64; 4] {
        self.counts
    }

    fn set(&mut self, slot: usize, depth: u64) {
        self.counts[slot] = depth;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteCounts {
    pub counts: NucleotideCounts,
    pub malformed_depths: usize,
    pub has_allele_depth: bool,
}

pub fn align_allele_depths(
    reference: &str,
    alternates: &str,
    allele_depth: Option<&str>,
) -> SiteCounts {
    let mut site = SiteCounts::default();
    let Some(depths) = allele_depth else {
        return site;
    };
    site.has_allele_depth = true;

    for (allele, raw_depth) in allele_list(reference, alternates).zip(depths.split(',')) {
        let depth = match raw_depth.parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                site.malformed_depths += 1;
                0
            }
        };
        // Symbolic and multi-base alleles hold their position without a slot.
        if let Some(slot) = nucleotide_slot(allele) {
            site.counts.set(slot, depth);
        }
    }
    site
}

pub fn count_site(record: &SiteRecord<'_>) -> SiteCounts {
    align_allele_depths(record.reference, record.alternates, record.allele_depth())
}

pub fn count_line(line: &str) -> Option<(SiteRecord<'_>, SiteCounts)> {
    if is_comment_line(line) {
        return None;
    }
    let record = SiteRecord::parse(line);
    let counts = count_site(&record);
    Some((record, counts))
}
