//! Mobipocket locale words to language tags.

/// `(langid, [(sublangid, tag)])`
static LANGUAGES: &[(u32, &[(u32, &str)])] = &[
    (54, &[(0, "af")]),
    (28, &[(0, "sq")]),
    (
        1,
        &[
            (0, "ar"),
            (5, "ar-dz"),
            (15, "ar-bh"),
            (3, "ar-eg"),
            (2, "ar-iq"),
            (11, "ar-jo"),
            (13, "ar-kw"),
            (12, "ar-lb"),
            (4, "ar-ly"),
            (6, "ar-ma"),
            (8, "ar-om"),
            (16, "ar-qa"),
            (1, "ar-sa"),
            (10, "ar-sy"),
            (7, "ar-tn"),
            (14, "ar-ae"),
            (9, "ar-ye"),
        ],
    ),
    (43, &[(0, "hy")]),
    (77, &[(0, "as")]),
    (44, &[(0, "az")]),
    (45, &[(0, "eu")]),
    (35, &[(0, "be")]),
    (69, &[(0, "bn")]),
    (2, &[(0, "bg")]),
    (3, &[(0, "ca")]),
    (
        4,
        &[(0, "zh"), (3, "zh-hk"), (2, "zh-cn"), (4, "zh-sg"), (1, "zh-tw")],
    ),
    (5, &[(0, "cs")]),
    (6, &[(0, "da")]),
    (19, &[(1, "nl"), (2, "nl-be")]),
    (
        9,
        &[
            (1, "en-us"),
            (3, "en-au"),
            (40, "en-bz"),
            (4, "en-ca"),
            (6, "en-ie"),
            (8, "en-jm"),
            (5, "en-nz"),
            (13, "en-ph"),
            (7, "en-za"),
            (11, "en-tt"),
            (2, "en-gb"),
            (12, "en-zw"),
        ],
    ),
    (37, &[(0, "et")]),
    (56, &[(0, "fo")]),
    (41, &[(0, "fa")]),
    (11, &[(0, "fi")]),
    (
        12,
        &[
            (1, "fr"),
            (2, "fr-be"),
            (3, "fr-ca"),
            (5, "fr-lu"),
            (6, "fr-mc"),
            (4, "fr-ch"),
        ],
    ),
    (55, &[(0, "ka")]),
    (
        7,
        &[(1, "de"), (3, "de-at"), (5, "de-li"), (4, "de-lu"), (2, "de-ch")],
    ),
    (8, &[(0, "el")]),
    (71, &[(0, "gu")]),
    (13, &[(0, "he")]),
    (57, &[(0, "hi")]),
    (14, &[(0, "hu")]),
    (15, &[(0, "is")]),
    (33, &[(0, "id")]),
    (16, &[(1, "it"), (2, "it-ch")]),
    (17, &[(0, "ja")]),
    (75, &[(0, "kn")]),
    (63, &[(0, "kk")]),
    (87, &[(0, "x-kok")]),
    (18, &[(0, "ko")]),
    (38, &[(0, "lv")]),
    (39, &[(0, "lt")]),
    (47, &[(0, "mk")]),
    (62, &[(0, "ms")]),
    (76, &[(0, "ml")]),
    (58, &[(0, "mt")]),
    (78, &[(0, "mr")]),
    (97, &[(0, "ne")]),
    (20, &[(0, "no")]),
    (72, &[(0, "or")]),
    (21, &[(0, "pl")]),
    (22, &[(2, "pt"), (1, "pt-br")]),
    (70, &[(0, "pa")]),
    (23, &[(0, "rm")]),
    (24, &[(0, "ro")]),
    (25, &[(0, "ru")]),
    (59, &[(0, "sz")]),
    (79, &[(0, "sa")]),
    // Croatian and Serbian share 26; only the Serbian sublanguage is mapped.
    (26, &[(3, "sr")]),
    (27, &[(0, "sk")]),
    (36, &[(0, "sl")]),
    (46, &[(0, "sb")]),
    (
        10,
        &[
            (0, "es"),
            (4, "es"),
            (44, "es-ar"),
            (64, "es-bo"),
            (52, "es-cl"),
            (36, "es-co"),
            (20, "es-cr"),
            (28, "es-do"),
            (48, "es-ec"),
            (68, "es-sv"),
            (16, "es-gt"),
            (72, "es-hn"),
            (8, "es-mx"),
            (76, "es-ni"),
            (24, "es-pa"),
            (60, "es-py"),
            (40, "es-pe"),
            (80, "es-pr"),
            (56, "es-uy"),
            (32, "es-ve"),
        ],
    ),
    (48, &[(0, "sx")]),
    (65, &[(0, "sw")]),
    (29, &[(0, "sv"), (1, "sv"), (8, "sv-fi")]),
    (73, &[(0, "ta")]),
    (68, &[(0, "tt")]),
    (74, &[(0, "te")]),
    (30, &[(0, "th")]),
    (49, &[(0, "ts")]),
    (50, &[(0, "tn")]),
    (31, &[(0, "tr")]),
    (34, &[(0, "uk")]),
    (32, &[(0, "ur")]),
    (67, &[(2, "uz")]),
    (42, &[(0, "vi")]),
    (52, &[(0, "xh")]),
    (53, &[(0, "zu")]),
];

/// Map a language/sublanguage pair to a tag, defaulting to `en`.
pub fn lookup(langid: u32, sublangid: u32) -> &'static str {
    LANGUAGES
        .iter()
        .find(|(id, _)| *id == langid)
        .and_then(|(_, subs)| subs.iter().find(|(sub, _)| *sub == sublangid))
        .map(|(_, tag)| *tag)
        .unwrap_or("en")
}

/// Split a 32-bit locale word as stored in the MOBI header.
pub fn from_locale(code: u32) -> &'static str {
    lookup(code & 0xFF, (code >> 10) & 0xFF)
}
