//! SMBIOS identity generation
//!
//! Two modes. Random mode draws opaque serial/MLB strings that satisfy the
//! validator but decode to nothing. Apple-services mode generates serial
//! and MLB from shared manufacturing data so their decoded country and
//! year agree, and computes the MLB check characters so the string passes
//! Apple's mod-34 alternating-weight checksum.

use osxpve_common::SmbiosIdentity;
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

/// Base-34 alphabet used in Apple serials: digits plus letters minus I/O.
const BASE34_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Year cycle for serial position 4. Shifted by one for second-half weeks.
const YEAR_CHARS: [char; 10] = ['C', 'D', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N'];

/// Fixed pools for the MLB middle blocks.
const MLB_BLOCK1: &[&str] = &["200", "600", "403", "404", "405"];
const MLB_BLOCK2: &[&str] = &["GU", "4N", "J9", "QX", "FD"];

/// Per-model manufacturing data: assembly countries, production years,
/// config codes, and board codes.
struct ModelMfg {
    model: &'static str,
    countries: &'static [&'static str],
    years: (u32, u32),
    model_codes: &'static [&'static str],
    boards: &'static [&'static str],
}

const MODEL_MFG: &[ModelMfg] = &[
    ModelMfg {
        model: "iMacPro1,1",
        countries: &["C02", "C07", "F5K"],
        years: (2017, 2019),
        model_codes: &["HX87", "HX8J", "HX8K", "HX8L"],
        boards: &["J137"],
    },
    ModelMfg {
        model: "MacPro7,1",
        countries: &["C02", "F5K"],
        years: (2019, 2021),
        model_codes: &["P7QM", "PLXV", "K7GF"],
        boards: &["J160"],
    },
];

/// Mac model reported to macOS for a given release.
pub fn model_for_release(macos: &str) -> &'static str {
    match macos {
        "tahoe" => "MacPro7,1",
        _ => "iMacPro1,1",
    }
}

fn mfg_for_model(model: &str) -> &'static ModelMfg {
    MODEL_MFG
        .iter()
        .find(|m| m.model == model)
        .unwrap_or(&MODEL_MFG[0])
}

/// Index of a character in the base-34 alphabet.
pub fn base34_index(c: char) -> Option<u32> {
    BASE34_ALPHABET
        .iter()
        .position(|&b| b as char == c)
        .map(|i| i as u32)
}

fn base34_char(value: u32) -> char {
    BASE34_ALPHABET[(value % 34) as usize] as char
}

/// Weighted character sum used by the MLB checksum: odd positions carry
/// weight 3, even positions weight 1.
fn mlb_weighted_sum(chars: &str) -> Option<u32> {
    let mut sum = 0u32;
    for (i, c) in chars.chars().enumerate() {
        let value = base34_index(c)?;
        let weight = if i % 2 == 1 { 3 } else { 1 };
        sum += value * weight;
    }
    Some(sum)
}

/// Verify the trailing checksum of a 17-character MLB.
pub fn verify_mlb_checksum(mlb: &str) -> bool {
    if mlb.chars().count() != 17 {
        return false;
    }
    match mlb_weighted_sum(mlb) {
        Some(sum) => sum % 34 == 0,
        None => false,
    }
}

/// Shared manufacturing data drawn once per identity so serial and MLB
/// decode consistently.
struct MfgData {
    country: &'static str,
    year: u32,
    week: u32,
    line: u32,
    model_code: &'static str,
    board: &'static str,
}

fn draw_mfg(model: &str) -> MfgData {
    let mfg = mfg_for_model(model);
    let mut rng = rand::thread_rng();
    MfgData {
        country: mfg.countries.choose(&mut rng).copied().unwrap(),
        year: rng.gen_range(mfg.years.0..=mfg.years.1),
        week: rng.gen_range(1..=52),
        line: rng.gen_range(0..3400),
        model_code: mfg.model_codes.choose(&mut rng).copied().unwrap(),
        board: mfg.boards.choose(&mut rng).copied().unwrap(),
    }
}

/// Encode year and week as the two serial characters.
///
/// The year char cycles through `YEAR_CHARS`, advancing one step for
/// second-half weeks; the week char indexes the week within its half-year,
/// always 1..=26 in base-34 (never 0, never above 26).
fn encode_year_week(year: u32, week: u32) -> (char, char) {
    let second_half = week > 26;
    let year_idx = ((year % 10) + u32::from(second_half)) % 10;
    let week_in_half = if second_half { week - 26 } else { week };
    (YEAR_CHARS[year_idx as usize], base34_char(week_in_half))
}

/// Encode the production line as three base-34 digits.
fn encode_line(line: u32) -> String {
    let mut out = String::with_capacity(3);
    out.push(base34_char(line / (34 * 34)));
    out.push(base34_char(line / 34));
    out.push(base34_char(line));
    out
}

fn apple_serial(mfg: &MfgData) -> String {
    let (year_char, week_char) = encode_year_week(mfg.year, mfg.week);
    format!(
        "{}{}{}{}{}",
        mfg.country,
        year_char,
        week_char,
        encode_line(mfg.line),
        mfg.model_code
    )
}

/// Build a 17-character MLB from the same manufacturing data.
///
/// The 15-character prefix is country, year digit, decimal week, and the
/// fixed pools; positions 16-17 are `0` plus the base-34 character that
/// makes the alternating-weight sum divisible by 34.
fn apple_mlb(mfg: &MfgData) -> String {
    let mut rng = rand::thread_rng();
    let prefix = format!(
        "{}{}{:02}{}{}{}",
        mfg.country,
        mfg.year % 10,
        mfg.week,
        MLB_BLOCK1.choose(&mut rng).unwrap(),
        MLB_BLOCK2.choose(&mut rng).unwrap(),
        mfg.board
    );
    debug_assert_eq!(prefix.len(), 15);
    let sum = mlb_weighted_sum(&prefix).expect("prefix drawn from base-34 pools");
    let check = base34_char((34 - sum % 34) % 34);
    format!("{prefix}0{check}")
}

/// Random 12-character serial: [A-Z0-9].
pub fn generate_serial() -> String {
    random_alnum(12)
}

/// Random 17-character MLB: [A-Z0-9].
pub fn generate_mlb() -> String {
    random_alnum(17)
}

fn random_alnum(len: usize) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| *CHARS.choose(&mut rng).unwrap() as char)
        .collect()
}

/// Random upper-case UUIDv4.
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

/// Random 12-hex-character ROM.
pub fn generate_rom() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode_upper(bytes)
}

/// Locally administered unicast MAC: first octet has the local bit set and
/// the multicast bit cleared.
pub fn generate_mac() -> String {
    let mut rng = rand::thread_rng();
    let mut octets = [0u8; 6];
    rng.fill(&mut octets[..]);
    octets[0] = (octets[0] | 0x02) & 0xFE;
    octets
        .iter()
        .map(|o| format!("{o:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Random upper-case UUID for the vmgenid device.
pub fn generate_vmgenid() -> String {
    generate_uuid()
}

/// Generate a full SMBIOS identity.
///
/// With `apple_services`, the serial and MLB share manufacturing data
/// (same country prefix, consistent year), the MLB passes the checksum,
/// and the ROM is the generated MAC with colons stripped.
pub fn generate_smbios(macos: &str, apple_services: bool) -> SmbiosIdentity {
    let model = model_for_release(macos).to_string();

    if !apple_services {
        return SmbiosIdentity {
            serial: generate_serial(),
            mlb: generate_mlb(),
            uuid: generate_uuid(),
            rom: generate_rom(),
            model,
            mac: None,
        };
    }

    let mfg = draw_mfg(&model);
    let mac = generate_mac();
    let rom = mac.replace(':', "");
    SmbiosIdentity {
        serial: apple_serial(&mfg),
        mlb: apple_mlb(&mfg),
        uuid: generate_uuid(),
        rom,
        model,
        mac: Some(mac),
    }
}
