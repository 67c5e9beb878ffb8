//! Pathway gene catalogs and their restriction to a matrix.

use annmat::AnnMatrix;

/// Wnt ligand genes.
pub const WNT_LIGANDS: &[&str] = &[
    "Wnt1", "Wnt2", "Wnt2b", "Wnt3", "Wnt3a", "Wnt4", "Wnt5a", "Wnt5b", "Wnt6", "Wnt7a", "Wnt7b",
    "Wnt8a", "Wnt8b", "Wnt9a", "Wnt9b", "Wnt10a", "Wnt10b", "Wnt11", "Wnt16",
];

/// Wnt receptor and signal transduction genes.
pub const WNT_RECEPTORS: &[&str] = &[
    "Lrp5", "Lrp6", "Dvl1", "Dvl2", "Dvl3", "Fzd1", "Fzd2", "Fzd3", "Fzd4", "Fzd5", "Fzd6", "Fzd7",
    "Fzd8", "Fzd9", "Fzd10",
];

/// Bmp ligand genes, including the Gdf family.
pub const BMP_LIGANDS: &[&str] = &[
    "Bmp3", "Bmp4", "Bmp5", "Bmp6", "Bmp7", "Bmp8a", "Bmp2", "Bmp10", "Bmp11", "Bmp15", "Gdf6",
    "Gdf7", "Gdf5", "Gdf10", "Gdf11",
];

/// Bmp and activin receptor genes.
pub const BMP_RECEPTORS: &[&str] = &[
    "Bmpr1a", "Bmpr1b", "Acvr1", "Acvrl1", "Acvr1b", "Tgfbr1", "Acvr1c", "Acvr2a", "Acvr2b",
    "Bmpr2", "Tgfbr2",
];

/// Notch ligand, receptor, and fringe modulator genes.
pub const NOTCH_COMPONENTS: &[&str] = &[
    "Dll1", "Dll3", "Dll4", "Jag1", "Jag2", "Notch1", "Notch2", "Notch3", "Notch4", "Mfng", "Rfng",
    "Lfng",
];

/// The five catalogs with their short names.
pub fn all_pathway_sets() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        ("wnt_ligands", WNT_LIGANDS),
        ("wnt_receptors", WNT_RECEPTORS),
        ("bmp_ligands", BMP_LIGANDS),
        ("bmp_receptors", BMP_RECEPTORS),
        ("notch", NOTCH_COMPONENTS),
    ]
}

/// Subset of `genes` present in the matrix, in the order given.
///
/// A symbol counts as present when some gene-axis name ends with it, which
/// tolerates composite `<id>-<symbol>` gene names.
pub fn retained_genes(matrix: &AnnMatrix, genes: &[&str]) -> Vec<String> {
    genes
        .iter()
        .filter(|symbol| {
            matrix
                .var_names()
                .iter()
                .any(|name| name.ends_with(*symbol))
        })
        .map(|s| s.to_string())
        .collect()
}

/// Every catalog restricted to the matrix, keyed by short name.
pub fn pathway_groups(matrix: &AnnMatrix) -> Vec<(String, Vec<String>)> {
    all_pathway_sets()
        .into_iter()
        .map(|(name, list)| (name.to_string(), retained_genes(matrix, list)))
        .collect()
}
