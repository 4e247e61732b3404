use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    fn push(&mut self, row: Vec<f64>, label: f64) {
        self.x.push(row);
        self.y.push(label);
    }
}

/// Shuffled split into (train, test). With `stratify`, labels are bucketed
/// at 0.5 and each bucket is split separately so both sides keep the class
/// balance. Each side receives at least one row when there are two or more.
pub fn train_test_split(
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
    train_fraction: f64,
    stratify: bool,
    seed: u64,
) -> (Dataset, Dataset) {
    let mut rng = StdRng::seed_from_u64(seed);
    let fraction = train_fraction.clamp(0.0, 1.0);

    let mut groups: Vec<Vec<usize>> = if stratify {
        let (pos, neg): (Vec<usize>, Vec<usize>) = (0..y.len()).partition(|i| y[*i] >= 0.5);
        vec![pos, neg]
    } else {
        vec![(0..y.len()).collect()]
    };

    let mut train = Dataset::default();
    let mut test = Dataset::default();
    let mut rows: Vec<Option<Vec<f64>>> = x.into_iter().map(Some).collect();

    for group in &mut groups {
        group.shuffle(&mut rng);
        let mut cut = (group.len() as f64 * fraction).round() as usize;
        if group.len() >= 2 {
            cut = cut.clamp(1, group.len() - 1);
        }
        for (pos, idx) in group.iter().enumerate() {
            let Some(row) = rows[*idx].take() else { continue };
            if pos < cut {
                train.push(row, y[*idx]);
            } else {
                test.push(row, y[*idx]);
            }
        }
    }
    (train, test)
}
