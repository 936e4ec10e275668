//! Import schedule shared by the common golden images
//!
//! Every cluster gets its own minute and hour offset so that clusters do not
//! all poll the image registries at the same moment. The schedule is written
//! once to `status.dataImportSchedule` and honored from then on.

use crate::kube_utils::sha256;

const SALT: &str = "kubevirt-hyperconverged-data-import-schedule";

/// Cron schedule for the HyperConverged resource `name`: twice a day at a
/// stable minute
pub fn generate(name: &str) -> String {
    let digest = sha256(&format!("{name}{SALT}"));
    let minute = u16::from_be_bytes([digest[0], digest[1]]) % 60;
    let hour = digest[2] % 12;
    format!("{minute} {hour}/12 * * *")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_stable() {
        assert_eq!(generate("kubevirt-hyperconverged"), generate("kubevirt-hyperconverged"));
    }

    #[test]
    fn schedule_is_a_twice_daily_cron() {
        let schedule = generate("kubevirt-hyperconverged");
        let fields: Vec<&str> = schedule.split(' ').collect();
        assert_eq!(fields.len(), 5);
        let minute: u16 = fields[0].parse().unwrap();
        assert!(minute < 60);
        let (hour, step) = fields[1].split_once('/').unwrap();
        assert!(hour.parse::<u8>().unwrap() < 12);
        assert_eq!(step, "12");
        assert_eq!(&fields[2..], ["*", "*", "*"]);
    }

    #[test]
    fn names_spread_the_load() {
        let schedules: std::collections::BTreeSet<String> =
            (0..20).map(|i| generate(&format!("hco-{i}"))).collect();
        assert!(schedules.len() > 1);
    }
}
